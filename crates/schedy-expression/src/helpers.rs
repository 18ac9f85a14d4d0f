//! The `schedule` and `pattern` namespaces of expressions

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use minijinja::value::{from_args, Object};
use minijinja::{Error, ErrorKind, State, Value};
use schedy_schedule::Schedule;

use crate::engine::ExpressionEngine;
use crate::evaluator::ScheduleEvaluator;
use crate::executor::ExprEnv;

/// How deep `schedule` helper calls may nest into each other
pub(crate) const MAX_HELPER_NESTING: usize = 8;

/// Upper bound for the instants `schedule.next_results()` looks at
const MAX_NEXT_RESULTS_STEPS: usize = 1000;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn helper_error(method: &str, message: impl fmt::Display) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("invalid argument to {method}: {message}"),
    )
}

fn format_datetime(when: NaiveDateTime) -> String {
    when.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// A full date and time, or a time of day on the date of `today`
fn parse_datetime(method: &str, s: &str, today: NaiveDateTime) -> Result<NaiveDateTime, Error> {
    let s = s.trim();
    for format in DATETIME_FORMATS {
        if let Ok(when) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(when);
        }
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Ok(today.date().and_time(time));
        }
    }
    Err(helper_error(method, format!("{s:?} is not a date and time")))
}

/// `schedule.evaluate(name, when=now)` and `schedule.next_results(name, start=now, end=start+1d)`
///
/// Schedules are looked up among the snippets and evaluated with the same
/// engine and value rules as the calling expression, for the same room.
pub(crate) struct ScheduleHelper {
    engine: ExpressionEngine,
}

impl ScheduleHelper {
    pub(crate) fn new(engine: ExpressionEngine) -> Self {
        Self { engine }
    }

    fn snippet(&self, method: &str, name: &str) -> Result<Arc<Schedule>, Error> {
        self.engine
            .snippets()
            .get(name)
            .cloned()
            .ok_or_else(|| helper_error(method, format!("unknown schedule snippet '{name}'")))
    }

    fn evaluator(&self, method: &str) -> Result<ScheduleEvaluator, Error> {
        if self.engine.depth() >= MAX_HELPER_NESTING {
            return Err(helper_error(method, "schedules nested too deeply"));
        }
        Ok(ScheduleEvaluator::new(
            Arc::new(self.engine.nested()),
            Arc::clone(self.engine.rules()),
        ))
    }

    /// The environment of the calling expression, moved to another instant
    fn env_at(state: &State<'_, '_>, when: NaiveDateTime) -> ExprEnv {
        let mut env = ExprEnv::new(when);
        let lookup = |name: &str| {
            state
                .lookup(name)
                .and_then(|value| value.as_str().map(str::to_string))
        };
        env.room_name = lookup("room_name");
        env.app_name = lookup("app_name");
        env
    }

    fn now(state: &State<'_, '_>, method: &str) -> Result<NaiveDateTime, Error> {
        let now = state
            .lookup("now")
            .and_then(|value| value.as_str().map(str::to_string))
            .ok_or_else(|| helper_error(method, "the current time is unknown"))?;
        NaiveDateTime::parse_from_str(&now, DATETIME_FORMATS[0])
            .map_err(|e| helper_error(method, e))
    }

    fn evaluate(&self, state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let method = "schedule.evaluate";
        let (name, when): (&str, Option<&str>) = from_args(args)?;
        let schedule = self.snippet(method, name)?;
        let now = Self::now(state, method)?;
        let when = when
            .map(|when| parse_datetime(method, when, now))
            .transpose()?
            .unwrap_or(now);
        let outcome = self
            .evaluator(method)?
            .evaluate(&schedule, &Self::env_at(state, when));
        Ok(outcome.map_or_else(|| Value::from(()), |outcome| Value::from_serialize(&outcome.value)))
    }

    fn next_results(&self, state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let method = "schedule.next_results";
        let (name, start, end): (&str, Option<&str>, Option<&str>) = from_args(args)?;
        let schedule = self.snippet(method, name)?;
        let now = Self::now(state, method)?;
        let start = start
            .map(|start| parse_datetime(method, start, now))
            .transpose()?
            .unwrap_or(now);
        let end = end
            .map(|end| parse_datetime(method, end, now))
            .transpose()?
            .unwrap_or(start + Duration::days(1));
        let evaluator = self.evaluator(method)?;

        let mut results: Vec<(String, serde_json::Value)> = Vec::new();
        let mut last: Option<serde_json::Value> = None;
        let mut when = Some(start);
        let mut steps = 0;
        while let Some(current) = when.filter(|when| *when < end) {
            steps += 1;
            if steps > MAX_NEXT_RESULTS_STEPS {
                break;
            }
            let value = evaluator
                .evaluate(&schedule, &Self::env_at(state, current))
                .map(|outcome| outcome.value);
            if let Some(value) = value {
                if last.as_ref() != Some(&value) {
                    results.push((format_datetime(current), value.clone()));
                    last = Some(value);
                }
            }
            when = schedule.next_scheduling_datetime(current + Duration::seconds(1));
        }
        if let Some(last) = last {
            results.push((format_datetime(end), last));
        }
        Ok(Value::from_serialize(&results))
    }
}

impl fmt::Debug for ScheduleHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleHelper")
            .field("depth", &self.engine.depth())
            .finish()
    }
}

impl Object for ScheduleHelper {
    fn call_method(
        self: &Arc<Self>,
        state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "evaluate" => self.evaluate(state, args),
            "next_results" => self.next_results(state, args),
            _ => Err(Error::from(ErrorKind::UnknownMethod)),
        }
    }
}

/// `pattern.linear(start_value, end_value, percentage)`
#[derive(Debug)]
pub(crate) struct PatternHelper;

/// The value `percentage` percent of the way from `start` to `end`
pub(crate) fn linear(start: f64, end: f64, percentage: f64) -> f64 {
    start + percentage * (end - start) / 100.0
}

impl Object for PatternHelper {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "linear" => {
                let (start, end, percentage): (f64, f64, f64) = from_args(args)?;
                Ok(Value::from(linear(start, end, percentage)))
            }
            _ => Err(Error::from(ErrorKind::UnknownMethod)),
        }
    }
}
