//! Rule paths: concrete alternatives explored while evaluating a schedule

use std::fmt;
use std::sync::Arc;

use crate::rule::{Rule, RuleBody};
use crate::schedule::Schedule;

/// A chain of rules from a root schedule down to one rule
///
/// Every rule but the last is a sub-schedule rule whose sub-schedule contains
/// the next one. Paths compare by identity: two paths share a prefix only if
/// they were produced from the very same rule objects.
#[derive(Debug, Clone)]
pub struct RulePath {
    root: Arc<Schedule>,
    rules: Vec<Arc<Rule>>,
}

impl RulePath {
    pub fn new(root: Arc<Schedule>, rule: Arc<Rule>) -> Self {
        Self {
            root,
            rules: vec![rule],
        }
    }

    pub fn root(&self) -> &Arc<Schedule> {
        &self.root
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn last(&self) -> Option<&Arc<Rule>> {
        self.rules.last()
    }

    /// Whether the path ends in a rule without sub-schedule
    pub fn is_final(&self) -> bool {
        self.last().map_or(false, |rule| !rule.is_sub_schedule_rule())
    }

    /// A new path with `rule` appended
    pub fn extended(&self, rule: Arc<Rule>) -> Self {
        let mut rules = self.rules.clone();
        rules.push(rule);
        Self {
            root: Arc::clone(&self.root),
            rules,
        }
    }

    /// A new path with the last rule swapped for `rule`
    pub fn with_last_replaced(&self, rule: Arc<Rule>) -> Self {
        let mut rules = self.rules.clone();
        rules.pop();
        rules.push(rule);
        Self {
            root: Arc::clone(&self.root),
            rules,
        }
    }

    /// Rules carrying an expression or value, most specific first
    pub fn rules_with_body(&self) -> impl Iterator<Item = (&Arc<Rule>, &RuleBody)> {
        self.rules
            .iter()
            .rev()
            .filter_map(|rule| rule.body().map(|body| (rule, body)))
    }

    /// Whether both paths start at the same root with the same first `len` rules
    pub fn shares_prefix(&self, other: &RulePath, len: usize) -> bool {
        if !Arc::ptr_eq(&self.root, &other.root) || self.len() < len || other.len() < len {
            return false;
        }
        self.rules[..len]
            .iter()
            .zip(&other.rules[..len])
            .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    /// Whether any sub-schedule rule along the path descends into `schedule`
    pub fn includes_schedule(&self, schedule: &Arc<Schedule>) -> bool {
        Arc::ptr_eq(&self.root, schedule)
            || self
                .rules
                .iter()
                .filter_map(|rule| rule.sub_schedule())
                .any(|sub| Arc::ptr_eq(sub, schedule))
    }
}

impl fmt::Display for RulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{rule}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_prefix_by_identity() {
        let leaf = Arc::new(Rule::with_value(1));
        let sub = Arc::new(Schedule::new(None, vec![Arc::clone(&leaf)]));
        let parent = Arc::new(Rule::including(Arc::clone(&sub)));
        let root = Arc::new(Schedule::new(None, vec![Arc::clone(&parent)]));

        let a = RulePath::new(Arc::clone(&root), Arc::clone(&parent)).extended(Arc::clone(&leaf));
        let b = RulePath::new(Arc::clone(&root), Arc::clone(&parent))
            .extended(Arc::new(Rule::with_value(1)));

        assert!(a.shares_prefix(&b, 0));
        assert!(a.shares_prefix(&b, 1));
        assert!(!a.shares_prefix(&b, 2));

        let other_root = Arc::new(Schedule::new(None, vec![Arc::clone(&parent)]));
        let c = RulePath::new(other_root, Arc::clone(&parent));
        assert!(!a.shares_prefix(&c, 0));
    }

    #[test]
    fn test_rules_with_body_most_specific_first() {
        let leaf = Arc::new(Rule::with_value(2));
        let plain = Arc::new(Rule::including(Arc::new(Schedule::default())));
        let parent = Arc::new(
            Rule::builder()
                .value(1)
                .sub_schedule(Schedule::default())
                .build()
                .unwrap(),
        );
        let root = Arc::new(Schedule::default());
        let path = RulePath::new(root, parent).extended(plain).extended(leaf);

        let values: Vec<_> = path
            .rules_with_body()
            .map(|(_, body)| match body {
                RuleBody::Value(v) => v.clone(),
                RuleBody::Expression(_) => serde_json::Value::Null,
            })
            .collect();
        assert_eq!(values, vec![serde_json::json!(2), serde_json::json!(1)]);
        assert!(path.is_final());
    }
}
