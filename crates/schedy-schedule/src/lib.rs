//! Schedule model for Schedy
//!
//! A [`Schedule`] is an ordered list of [`Rule`]s. Each rule has a daily time
//! window which may span midnight and several days, a set of calendar
//! constraints, and either an expression or a literal value. A rule may own a
//! nested schedule, which is only looked at when the rule itself matches.
//!
//! This crate knows nothing about expressions beyond their source text; the
//! evaluation of a schedule lives in `schedy-expression`.

mod constraint;
mod error;
mod parse;
mod path;
mod rule;
mod schedule;

pub use constraint::{Constraints, DateDirection, PartialDate};
pub use error::{ScheduleError, ScheduleResult};
pub use parse::{expand_range_spec, parse_rule_time, parse_time};
pub use path::RulePath;
pub use rule::{Expression, Rule, RuleBody, RuleBuilder};
pub use schedule::Schedule;
