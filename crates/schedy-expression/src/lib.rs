//! Expressions and schedule evaluation for Schedy
//!
//! Evaluating a rule yields an [`ExprResult`]: a final value, a preliminary
//! modifier to be combined with a value found later, or a control directive
//! steering the search. [`ScheduleEvaluator`] walks the rule tree of a
//! schedule depth-first and resolves these results into a single value.
//!
//! Expressions are executed by an [`ExpressionExecutor`]; the default one,
//! [`ExpressionEngine`], runs minijinja expressions with the result
//! constructors (`Add(1)`, `Mark(OFF, 'overlay')`, `IncludeSchedule('x')`, ...),
//! state helpers and the `schedule` and `pattern` namespaces registered as
//! globals.

mod engine;
mod error;
mod evaluator;
mod executor;
mod globals;
mod helpers;
mod result;
mod rules;

pub use engine::ExpressionEngine;
pub use error::{CombineError, ExpressionError, ExpressionResult, ValidationError};
pub use evaluator::{ScheduleEvaluator, ScheduleOutcome, MAX_PATH_EXPANSIONS};
pub use executor::{ExprEnv, ExpressionExecutor};
pub use result::{is_truthy, Control, ExprResult, Marker, Postprocessor, Preliminary};
pub use rules::{AnyValue, ValueRules};
