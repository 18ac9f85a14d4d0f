//! The expression executor contract and its explicit environment

use chrono::{Datelike, NaiveDateTime, Timelike};
use schedy_schedule::Expression;
use serde_json::{Map, Value};

use crate::error::ExpressionResult;
use crate::result::ExprResult;

/// Everything an expression may look at besides host states
///
/// Passed explicitly on every execution so results only depend on their
/// inputs.
#[derive(Debug, Clone)]
pub struct ExprEnv {
    /// Instant the schedule is evaluated for
    pub now: NaiveDateTime,
    pub room_name: Option<String>,
    pub app_name: Option<String>,
    /// Additional variables
    pub variables: Map<String, Value>,
}

impl ExprEnv {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            room_name: None,
            app_name: None,
            variables: Map::new(),
        }
    }

    pub fn with_room(mut self, room_name: impl Into<String>) -> Self {
        self.room_name = Some(room_name.into());
        self
    }

    pub fn with_app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Variables visible to expressions
    ///
    /// Time is exposed both as ISO strings and as numeric parts; weekdays are
    /// numbered 1 (Monday) to 7 (Sunday).
    pub fn to_context(&self) -> Value {
        let mut ctx = self.variables.clone();
        let now = self.now;
        ctx.insert(
            "now".to_string(),
            Value::from(now.format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
        ctx.insert(
            "date".to_string(),
            Value::from(now.format("%Y-%m-%d").to_string()),
        );
        ctx.insert(
            "time".to_string(),
            Value::from(now.format("%H:%M:%S").to_string()),
        );
        ctx.insert("year".to_string(), Value::from(now.year()));
        ctx.insert("month".to_string(), Value::from(now.month()));
        ctx.insert("day".to_string(), Value::from(now.day()));
        ctx.insert(
            "weekday".to_string(),
            Value::from(now.weekday().number_from_monday()),
        );
        ctx.insert("hour".to_string(), Value::from(now.hour()));
        ctx.insert("minute".to_string(), Value::from(now.minute()));
        ctx.insert("second".to_string(), Value::from(now.second()));
        if let Some(room) = &self.room_name {
            ctx.insert("room_name".to_string(), Value::from(room.as_str()));
        }
        if let Some(app) = &self.app_name {
            ctx.insert("app_name".to_string(), Value::from(app.as_str()));
        }
        Value::Object(ctx)
    }
}

/// Executes rule expressions
pub trait ExpressionExecutor: Send + Sync {
    fn execute(&self, expression: &Expression, env: &ExprEnv) -> ExpressionResult<ExprResult>;
}
