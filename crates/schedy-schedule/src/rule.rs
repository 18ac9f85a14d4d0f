//! Rules: a time window, calendar constraints and what to do when matched

use std::fmt;
use std::sync::Arc;

use chrono::{Days, NaiveDateTime, NaiveTime};
use tracing::trace;

use crate::constraint::Constraints;
use crate::error::{ScheduleError, ScheduleResult};
use crate::schedule::Schedule;

/// Source text of an expression attached to a rule
///
/// Expressions are shared through `Arc`; evaluation memoizes results per
/// expression object, so the same `Arc` reached through different paths is
/// executed only once per evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
}

impl Expression {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// What a rule yields when it is evaluated
#[derive(Debug, Clone)]
pub enum RuleBody {
    Expression(Arc<Expression>),
    Value(serde_json::Value),
}

/// A single scheduling rule
///
/// The window opens at `start_time` on a day satisfying the constraints and
/// closes at `end_time`, `end_plus_days` days later. A rule owning a
/// sub-schedule is a sub-schedule rule; its own body, if any, serves as the
/// fallback for the rules nested below it.
#[derive(Debug, Clone)]
pub struct Rule {
    name: Option<String>,
    start_time: NaiveTime,
    end_time: NaiveTime,
    end_plus_days: u32,
    constraints: Constraints,
    body: Option<RuleBody>,
    sub_schedule: Option<Arc<Schedule>>,
}

impl Rule {
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    /// An all-day rule yielding a literal value
    pub fn with_value(value: impl Into<serde_json::Value>) -> Self {
        Self::all_day(Some(RuleBody::Value(value.into())), None)
    }

    /// An all-day rule yielding the result of an expression
    pub fn with_expression(source: impl Into<String>) -> Self {
        Self::all_day(
            Some(RuleBody::Expression(Arc::new(Expression::new(source)))),
            None,
        )
    }

    /// An all-day rule whose only purpose is to descend into `schedule`
    pub fn including(schedule: Arc<Schedule>) -> Self {
        Self::all_day(None, Some(schedule))
    }

    fn all_day(body: Option<RuleBody>, sub_schedule: Option<Arc<Schedule>>) -> Self {
        Self {
            name: None,
            start_time: NaiveTime::MIN,
            end_time: NaiveTime::MIN,
            end_plus_days: 1,
            constraints: Constraints::default(),
            body,
            sub_schedule,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start_time
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end_time
    }

    pub fn end_plus_days(&self) -> u32 {
        self.end_plus_days
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn body(&self) -> Option<&RuleBody> {
        self.body.as_ref()
    }

    pub fn sub_schedule(&self) -> Option<&Arc<Schedule>> {
        self.sub_schedule.as_ref()
    }

    pub fn is_sub_schedule_rule(&self) -> bool {
        self.sub_schedule.is_some()
    }

    /// Whether the rule holds at every instant
    ///
    /// Such rules have no constraints and a window of a full day or more; the
    /// builder normalizes them to a canonical midnight-to-midnight window.
    pub fn is_always_valid(&self) -> bool {
        self.constraints.is_empty()
            && self.end_plus_days == 1
            && self.start_time == NaiveTime::MIN
            && self.end_time == NaiveTime::MIN
    }

    /// Check whether `when` falls into an occurrence of the rule's window
    ///
    /// Day offsets `0..=end_plus_days` are scanned backwards from `when`'s
    /// date; an offset is a candidate start day only if the constraints hold
    /// for it. The start time applies to offset 0 and the end time to the last
    /// offset, days in between qualify automatically.
    pub fn matches(&self, when: NaiveDateTime) -> bool {
        if self.is_always_valid() {
            return true;
        }

        let time = when.time();
        let today = when.date();
        for days_back in 0..=self.end_plus_days {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(days_back))) else {
                break;
            };
            if !self.constraints.check(date) {
                continue;
            }
            if days_back == 0 && time < self.start_time {
                continue;
            }
            if days_back == self.end_plus_days && time >= self.end_time {
                continue;
            }
            trace!(rule = %self, %when, days_back, "Rule matches");
            return true;
        }
        false
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<Rule {name:?}")?,
            None => f.write_str("<Rule")?,
        }
        write!(
            f,
            " {}-{}",
            self.start_time.format("%H:%M:%S"),
            self.end_time.format("%H:%M:%S")
        )?;
        if self.end_plus_days != 0 {
            write!(f, "+{}d", self.end_plus_days)?;
        }
        match &self.body {
            Some(RuleBody::Expression(expr)) => write!(f, " x={:?}", expr.source())?,
            Some(RuleBody::Value(value)) => write!(f, " v={value}")?,
            None => {}
        }
        if let Some(sub) = &self.sub_schedule {
            write!(f, " [{} rules]", sub.rules().len())?;
        }
        f.write_str(">")
    }
}

/// Builder for [`Rule`]s
#[derive(Debug, Clone, Default)]
pub struct RuleBuilder {
    name: Option<String>,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    end_plus_days: Option<u32>,
    constraints: Constraints,
    expression: Option<String>,
    value: Option<serde_json::Value>,
    sub_schedule: Option<Arc<Schedule>>,
}

impl RuleBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn start(mut self, time: NaiveTime) -> Self {
        self.start_time = Some(time);
        self
    }

    pub fn end(mut self, time: NaiveTime) -> Self {
        self.end_time = Some(time);
        self
    }

    /// Override the day offset at which the window closes
    pub fn end_plus_days(mut self, days: u32) -> Self {
        self.end_plus_days = Some(days);
        self
    }

    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn expression(mut self, source: impl Into<String>) -> Self {
        self.expression = Some(source.into());
        self
    }

    pub fn value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn sub_schedule(mut self, schedule: impl Into<Arc<Schedule>>) -> Self {
        self.sub_schedule = Some(schedule.into());
        self
    }

    pub fn build(self) -> ScheduleResult<Rule> {
        let label = self.name.clone().unwrap_or_else(|| "<unnamed>".to_string());

        let body = match (self.expression, self.value) {
            (Some(_), Some(_)) => return Err(ScheduleError::ExpressionAndValue { rule: label }),
            (Some(source), None) => Some(RuleBody::Expression(Arc::new(Expression::new(source)))),
            (None, Some(value)) => Some(RuleBody::Value(value)),
            (None, None) => None,
        };

        let mut start_time = self.start_time.unwrap_or(NaiveTime::MIN);
        let mut end_time = self.end_time.unwrap_or(NaiveTime::MIN);
        let mut end_plus_days = self
            .end_plus_days
            .unwrap_or(if end_time <= start_time { 1 } else { 0 });

        if end_plus_days == 0 && end_time <= start_time {
            return Err(ScheduleError::EmptyWindow { rule: label });
        }

        let full_day = end_plus_days > 1 || (end_plus_days == 1 && end_time >= start_time);
        if self.constraints.is_empty() && full_day {
            start_time = NaiveTime::MIN;
            end_time = NaiveTime::MIN;
            end_plus_days = 1;
        }

        Ok(Rule {
            name: self.name,
            start_time,
            end_time,
            end_plus_days,
            constraints: self.constraints,
            body,
            sub_schedule: self.sub_schedule,
        })
    }
}
