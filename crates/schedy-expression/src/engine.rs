//! minijinja based expression engine

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::value::{Kwargs, Rest};
use minijinja::{context, Environment, Value};
use schedy_core::StateStore;
use schedy_schedule::{Expression, Schedule};
use tracing::trace;

use crate::error::ExpressionResult;
use crate::executor::{ExprEnv, ExpressionExecutor};
use crate::globals;
use crate::helpers::{PatternHelper, ScheduleHelper};
use crate::result::ExprResult;
use crate::rules::{AnyValue, ValueRules};

/// Executes rule expressions as minijinja expressions
///
/// The environment provides:
/// - Result constructors: `Add`, `And`, `Multiply`, `Negate`, `Or`,
///   `Postprocess`, `Abort`, `Break`, `Skip`, `Inherit`, `IncludeSchedule`, `Mark`
/// - State helpers: `state()`, `is_state()`, `is_on()`, `is_off()`,
///   `has_value()`, `filter_entities()`
/// - `is_empty()`, `round_to_step()` and whatever extra globals the actor type
///   contributes
/// - `schedule.evaluate()`, `schedule.next_results()` and `pattern.linear()`
/// - The time and room variables of [`ExprEnv`]
#[derive(Clone)]
pub struct ExpressionEngine {
    env: Arc<Environment<'static>>,
    snippets: Arc<HashMap<String, Arc<Schedule>>>,
    rules: Arc<dyn ValueRules>,
    depth: usize,
}

impl ExpressionEngine {
    /// Create an engine reading host states and resolving schedule snippets
    pub fn new(states: Arc<dyn StateStore>, snippets: HashMap<String, Arc<Schedule>>) -> Self {
        let snippets = Arc::new(snippets);
        let mut env = Environment::new();
        Self::register_results(&mut env, Arc::clone(&snippets));
        Self::register_state_helpers(&mut env, states);
        env.add_function("round_to_step", globals::round_to_step);
        env.add_function("is_empty", globals::is_empty);
        env.add_global("pattern", Value::from_object(PatternHelper));
        Self {
            env: Arc::new(env),
            snippets,
            rules: Arc::new(AnyValue),
            depth: 0,
        }
    }

    /// Add a global constant, e.g. `OFF` for thermostats
    pub fn with_global(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        Arc::make_mut(&mut self.env).add_global(name.into(), Value::from_serialize(&value));
        self
    }

    /// Value semantics used when expressions evaluate schedules themselves
    pub fn with_value_rules(mut self, rules: Arc<dyn ValueRules>) -> Self {
        self.rules = rules;
        self
    }

    pub(crate) fn snippets(&self) -> &HashMap<String, Arc<Schedule>> {
        &self.snippets
    }

    pub(crate) fn rules(&self) -> &Arc<dyn ValueRules> {
        &self.rules
    }

    /// How many `schedule` helper calls this engine is nested in
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// The same engine, one `schedule` helper call deeper
    pub(crate) fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    fn register_results(env: &mut Environment<'static>, snippets: Arc<HashMap<String, Arc<Schedule>>>) {
        // Preliminary results
        env.add_function("Add", globals::add);
        env.add_function("And", globals::and);
        env.add_function("Multiply", globals::multiply);
        env.add_function("Negate", globals::negate);
        env.add_function("Or", globals::or);
        env.add_function("Postprocess", globals::postprocess);

        // Control results
        env.add_function("Abort", globals::abort);
        env.add_function("Break", globals::break_levels);
        env.add_function("Skip", globals::skip);
        env.add_function("Next", globals::skip);
        env.add_function("Inherit", globals::inherit);
        env.add_function("Mark", |result: Value, markers: Rest<String>| {
            globals::mark(result, markers)
        });
        env.add_function("IncludeSchedule", move |name: &str| {
            globals::include_schedule(&snippets, name)
        });
    }

    fn register_state_helpers(env: &mut Environment<'static>, states: Arc<dyn StateStore>) {
        let states_for_state = Arc::clone(&states);
        env.add_function(
            "state",
            move |entity_id: &str, attribute: Option<&str>| {
                globals::state(states_for_state.as_ref(), entity_id, attribute)
            },
        );

        let states_for_is_state = Arc::clone(&states);
        env.add_function("is_state", move |entity_id: &str, expected: &str| {
            globals::is_state(states_for_is_state.as_ref(), entity_id, expected)
        });

        let states_for_is_on = Arc::clone(&states);
        env.add_function("is_on", move |entity_id: &str| {
            globals::is_state(states_for_is_on.as_ref(), entity_id, "on")
        });

        let states_for_is_off = Arc::clone(&states);
        env.add_function("is_off", move |entity_id: &str| {
            globals::is_state(states_for_is_off.as_ref(), entity_id, "off")
        });

        let states_for_filter = Arc::clone(&states);
        env.add_function(
            "filter_entities",
            move |entities: Option<Value>, criteria: Kwargs| {
                globals::filter_entities(states_for_filter.as_ref(), entities, criteria)
            },
        );

        env.add_function("has_value", move |entity_id: &str| {
            globals::has_value(states.as_ref(), entity_id)
        });
    }

    /// Check that an expression compiles
    pub fn check_syntax(&self, source: &str) -> ExpressionResult<()> {
        self.env.compile_expression(source)?;
        Ok(())
    }

    /// Evaluate expression source in the given environment
    pub fn evaluate(&self, source: &str, env: &ExprEnv) -> ExpressionResult<ExprResult> {
        trace!(expression = source, depth = self.depth, "Evaluating expression");
        let expr = self.env.compile_expression(source)?;
        let ctx = context! {
            schedule => Value::from_object(ScheduleHelper::new(self.clone())),
            ..Value::from_serialize(env.to_context())
        };
        let value = expr.eval(ctx)?;
        globals::to_result(&value)
    }
}

impl ExpressionExecutor for ExpressionEngine {
    fn execute(&self, expression: &Expression, env: &ExprEnv) -> ExpressionResult<ExprResult> {
        self.evaluate(expression.source(), env)
    }
}
