//! Depth-first resolution of a schedule into a single value

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use schedy_schedule::{Expression, Rule, RuleBody, RulePath, Schedule};
use serde_json::Value;
use tracing::{debug, error, instrument, trace, warn};

use crate::error::ExpressionResult;
use crate::executor::{ExprEnv, ExpressionExecutor};
use crate::result::{Control, ExprResult, Marker, Preliminary};
use crate::rules::ValueRules;

/// Upper bound for sub-schedule expansions and inclusions per evaluation
pub const MAX_PATH_EXPANSIONS: usize = 1000;

/// The value a schedule resolved to
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub value: Value,
    pub markers: BTreeSet<Marker>,
    /// The rule at the end of the path that produced the value
    pub rule: Arc<Rule>,
}

impl ScheduleOutcome {
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }
}

/// Evaluates schedules with a given executor and value semantics
#[derive(Clone)]
pub struct ScheduleEvaluator {
    executor: Arc<dyn ExpressionExecutor>,
    rules: Arc<dyn ValueRules>,
    max_expansions: usize,
}

impl ScheduleEvaluator {
    pub fn new(executor: Arc<dyn ExpressionExecutor>, rules: Arc<dyn ValueRules>) -> Self {
        Self {
            executor,
            rules,
            max_expansions: MAX_PATH_EXPANSIONS,
        }
    }

    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    pub fn executor(&self) -> &Arc<dyn ExpressionExecutor> {
        &self.executor
    }

    pub fn rules(&self) -> &Arc<dyn ValueRules> {
        &self.rules
    }

    /// Resolve `schedule` at `env.now`
    ///
    /// Paths are explored depth-first in schedule order; the first path that
    /// resolves to a valid value wins. Returns None when no path resolves,
    /// when a rule aborts, or when combining or validation fails.
    #[instrument(skip_all, fields(schedule = schedule.name().unwrap_or("-"), when = %env.now))]
    pub fn evaluate(&self, schedule: &Arc<Schedule>, env: &ExprEnv) -> Option<ScheduleOutcome> {
        let when = env.now;
        let mut paths: Vec<RulePath> = schedule
            .matching_rules(when)
            .map(|rule| RulePath::new(Arc::clone(schedule), Arc::clone(rule)))
            .collect();
        let mut cursor = 0;
        let mut expansions = 0;
        let mut memo: HashMap<*const Expression, ExpressionResult<ExprResult>> = HashMap::new();
        let mut markers = BTreeSet::new();
        let mut pending: Vec<Preliminary> = Vec::new();

        while cursor < paths.len() {
            let path = paths[cursor].clone();
            cursor += 1;
            trace!(%path, "Exploring rule path");

            if let Some(sub) = path.last().and_then(|rule| rule.sub_schedule()) {
                expansions += 1;
                if expansions > self.max_expansions {
                    warn!(expansions, "Too many sub-schedule expansions, aborting");
                    return None;
                }
                let children: Vec<RulePath> = sub
                    .matching_rules(when)
                    .map(|rule| path.extended(Arc::clone(rule)))
                    .collect();
                paths.splice(cursor..cursor, children);
                continue;
            }

            let result = match self.resolve_path(&path, env, &mut memo, &mut markers) {
                Some(result) => result,
                None => continue,
            };

            match result {
                ExprResult::None
                | ExprResult::Control(Control::Inherit)
                | ExprResult::Control(Control::Mark(..)) => {}
                ExprResult::Control(Control::Abort) => {
                    debug!(%path, "Aborting evaluation");
                    return None;
                }
                ExprResult::Control(Control::Skip) => {
                    trace!(%path, "Skipping path");
                }
                ExprResult::Control(Control::Break(levels)) => {
                    let prefix = path.len().saturating_sub(levels as usize);
                    let mut pruned = 0;
                    while cursor < paths.len() && paths[cursor].shares_prefix(&path, prefix) {
                        paths.remove(cursor);
                        pruned += 1;
                    }
                    trace!(%path, levels, pruned, "Breaking out of sub-schedule");
                }
                ExprResult::Control(Control::IncludeSchedule(included)) => {
                    expansions += 1;
                    if expansions > self.max_expansions {
                        warn!(expansions, "Too many schedule inclusions, aborting");
                        return None;
                    }
                    trace!(%path, "Including schedule");
                    let rule = Arc::new(Rule::including(included));
                    paths.insert(cursor, path.with_last_replaced(rule));
                }
                ExprResult::Preliminary(modifier) => {
                    let modifier = self.validate_operand(modifier)?;
                    trace!(%path, %modifier, "Queueing preliminary result");
                    pending.push(modifier);
                }
                ExprResult::Value(value) => {
                    let value = self.finalize(value, &pending)?;
                    let rule = path.last().map(Arc::clone)?;
                    debug!(%path, %value, ?markers, "Schedule resolved");
                    return Some(ScheduleOutcome {
                        value,
                        markers,
                        rule,
                    });
                }
            }
        }

        debug!("No rule path resolved to a value");
        None
    }

    /// Evaluate the rules of a path from most to least specific
    ///
    /// Returns the first result that isn't None, or None if the path yields
    /// nothing or one of its expressions failed. Markers are collected into
    /// `markers` as results are unwrapped. `Inherit()` and an inclusion of a
    /// schedule already on the path defer to the next less specific rule.
    fn resolve_path(
        &self,
        path: &RulePath,
        env: &ExprEnv,
        memo: &mut HashMap<*const Expression, ExpressionResult<ExprResult>>,
        markers: &mut BTreeSet<Marker>,
    ) -> Option<ExprResult> {
        for (rule, body) in path.rules_with_body() {
            let mut result = match body {
                RuleBody::Value(value) => ExprResult::from_value(value.clone()),
                RuleBody::Expression(expr) => {
                    let outcome = memo
                        .entry(Arc::as_ptr(expr))
                        .or_insert_with(|| self.executor.execute(expr, env))
                        .clone();
                    match outcome {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(%rule, error = %err, "Evaluation failed, skipping rule");
                            return None;
                        }
                    }
                }
            };
            while let ExprResult::Control(Control::Mark(inner, rule_markers)) = result {
                trace!(markers = ?rule_markers, "Result is marked");
                markers.extend(rule_markers);
                result = *inner;
            }
            match &result {
                ExprResult::None | ExprResult::Control(Control::Inherit) => {
                    trace!(%path, %rule, "Deferring to the parent rule");
                }
                ExprResult::Control(Control::IncludeSchedule(included))
                    if path.includes_schedule(included) =>
                {
                    debug!(%path, %rule, "Inclusion would cycle, deferring to the parent rule");
                }
                _ => return Some(result),
            }
        }
        trace!(%path, "Path yields no result");
        None
    }

    /// Validate the operand of a modifier when it is queued
    fn validate_operand(&self, modifier: Preliminary) -> Option<Preliminary> {
        let checked = match modifier {
            Preliminary::Add(value) => self.rules.validate_value(value).map(Preliminary::Add),
            Preliminary::Multiply(value) => {
                self.rules.validate_value(value).map(Preliminary::Multiply)
            }
            other => Ok(other),
        };
        match checked {
            Ok(modifier) => Some(modifier),
            Err(err) => {
                error!(error = %err, "Invalid operand, aborting");
                None
            }
        }
    }

    /// Validate a final value and apply the queued modifiers in order
    fn finalize(&self, value: Value, pending: &[Preliminary]) -> Option<Value> {
        let mut value = match self.rules.validate_value(value) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "Invalid value, aborting");
                return None;
            }
        };
        for modifier in pending {
            let combined = match self.rules.combine(modifier, &value) {
                Ok(combined) => combined,
                Err(err) => {
                    error!(error = %err, "Failed to combine results, aborting");
                    return None;
                }
            };
            value = match self.rules.validate_value(combined) {
                Ok(value) => value,
                Err(err) => {
                    error!(%modifier, error = %err, "Invalid combined value, aborting");
                    return None;
                }
            };
        }
        Some(value)
    }
}
