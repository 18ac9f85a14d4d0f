//! Schedules: ordered rule lists and the times at which they may change

use std::collections::BTreeSet;
use std::ops::Add;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, NaiveTime};

use crate::error::{ScheduleError, ScheduleResult};
use crate::path::RulePath;
use crate::rule::Rule;

/// An ordered list of rules; earlier rules take precedence
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    name: Option<String>,
    rules: Vec<Arc<Rule>>,
}

impl Schedule {
    pub fn new(name: Option<String>, rules: Vec<Arc<Rule>>) -> Self {
        Self { name, rules }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Some(name.into()), Vec::new())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn push(&mut self, rule: impl Into<Arc<Rule>>) {
        self.rules.push(rule.into());
    }

    pub fn with_rule(mut self, rule: impl Into<Arc<Rule>>) -> Self {
        self.push(rule);
        self
    }

    /// A schedule with the rules of `self` followed by those of `other`
    ///
    /// Rules are shared, not copied.
    pub fn concat(&self, other: &Schedule) -> Schedule {
        let mut rules = self.rules.clone();
        rules.extend(other.rules.iter().cloned());
        Schedule {
            name: self.name.clone().or_else(|| other.name.clone()),
            rules,
        }
    }

    /// Rules matching at `when`, in schedule order
    ///
    /// Sub-schedule rules are matched as opaque nodes; their sub-schedules are
    /// not looked into.
    pub fn matching_rules(&self, when: NaiveDateTime) -> impl Iterator<Item = &Arc<Rule>> + '_ {
        self.rules.iter().filter(move |rule| rule.matches(when))
    }

    /// All start and end times of rules that aren't always valid, recursively
    pub fn scheduling_times(&self) -> BTreeSet<NaiveTime> {
        let mut times = BTreeSet::new();
        self.collect_scheduling_times(&mut times);
        times
    }

    fn collect_scheduling_times(&self, times: &mut BTreeSet<NaiveTime>) {
        for rule in &self.rules {
            if !rule.is_always_valid() {
                times.insert(rule.start_time());
                times.insert(rule.end_time());
            }
            if let Some(sub) = rule.sub_schedule() {
                sub.collect_scheduling_times(times);
            }
        }
    }

    /// The earliest instant at or after `now` at which the result may change
    ///
    /// Times of day earlier than `now`'s are taken to be tomorrow. Returns
    /// None for a schedule made only of always valid rules.
    pub fn next_scheduling_datetime(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let current = now.time();
        let today = now.date();
        self.scheduling_times()
            .into_iter()
            .map(|time| {
                let date = if time < current {
                    today + Duration::days(1)
                } else {
                    today
                };
                date.and_time(time)
            })
            .min()
    }

    /// Check that every path through the schedule yields something
    ///
    /// A path whose rules carry neither expression nor value can never produce
    /// a result and is reported as an error.
    pub fn validate(self: &Arc<Self>) -> ScheduleResult<()> {
        let mut pending: Vec<RulePath> = self
            .rules
            .iter()
            .rev()
            .map(|rule| RulePath::new(Arc::clone(self), Arc::clone(rule)))
            .collect();

        while let Some(path) = pending.pop() {
            let Some(last) = path.last() else {
                continue;
            };
            match last.sub_schedule() {
                Some(sub) if !sub.rules.is_empty() => {
                    for rule in sub.rules.iter().rev() {
                        pending.push(path.extended(Arc::clone(rule)));
                    }
                }
                _ => {
                    if path.rules_with_body().next().is_none() {
                        return Err(ScheduleError::MissingValue {
                            path: path.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl Add for Schedule {
    type Output = Schedule;

    fn add(self, other: Schedule) -> Schedule {
        self.concat(&other)
    }
}

impl FromIterator<Rule> for Schedule {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self::new(None, iter.into_iter().map(Arc::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn make_test_schedule() -> Schedule {
        let nested: Schedule = [Rule::builder()
            .start(t(12, 0))
            .end(t(13, 0))
            .value(19)
            .build()
            .unwrap()]
        .into_iter()
        .collect();

        [
            Rule::builder()
                .start(t(7, 0))
                .end(t(22, 0))
                .value(21.0)
                .build()
                .unwrap(),
            Rule::builder()
                .start(t(10, 0))
                .end(t(14, 0))
                .sub_schedule(nested)
                .build()
                .unwrap(),
            Rule::with_value(16.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_matching_rules_in_order() {
        let schedule = make_test_schedule();
        assert_eq!(schedule.matching_rules(at(11, 0)).count(), 3);
        assert_eq!(schedule.matching_rules(at(23, 0)).count(), 1);
        let first = schedule.matching_rules(at(6, 0)).next().unwrap();
        assert!(first.is_always_valid());
    }

    #[test]
    fn test_scheduling_times_skip_always_valid() {
        let times: Vec<_> = make_test_schedule().scheduling_times().into_iter().collect();
        assert_eq!(times, vec![t(7, 0), t(10, 0), t(12, 0), t(13, 0), t(14, 0), t(22, 0)]);
    }

    #[test]
    fn test_next_scheduling_datetime() {
        let schedule = make_test_schedule();
        assert_eq!(schedule.next_scheduling_datetime(at(8, 0)), Some(at(10, 0)));
        assert_eq!(schedule.next_scheduling_datetime(at(10, 0)), Some(at(10, 0)));
        assert_eq!(
            schedule.next_scheduling_datetime(at(23, 0)),
            Some(at(7, 0) + Duration::days(1))
        );

        let flat: Schedule = [Rule::with_value(1)].into_iter().collect();
        assert_eq!(flat.next_scheduling_datetime(at(8, 0)), None);
    }

    #[test]
    fn test_concat_shares_rules() {
        let a: Schedule = [Rule::with_value(1)].into_iter().collect();
        let b: Schedule = [Rule::with_value(2)].into_iter().collect();
        let joined = a.clone() + b.clone();
        assert_eq!(joined.rules().len(), 2);
        assert!(Arc::ptr_eq(&joined.rules()[0], &a.rules()[0]));
        assert!(Arc::ptr_eq(&joined.rules()[1], &b.rules()[0]));
    }

    #[test]
    fn test_validate_reports_paths_without_value() {
        let ok = Arc::new(make_test_schedule());
        assert!(ok.validate().is_ok());

        let bare: Schedule = [Rule::builder().start(t(1, 0)).end(t(2, 0)).build().unwrap()]
            .into_iter()
            .collect();
        assert!(matches!(
            Arc::new(bare).validate(),
            Err(ScheduleError::MissingValue { .. })
        ));

        let inherited: Schedule = [Rule::builder()
            .value(5)
            .sub_schedule(Schedule::from_iter([Rule::builder()
                .start(t(1, 0))
                .end(t(2, 0))
                .build()
                .unwrap()]))
            .build()
            .unwrap()]
        .into_iter()
        .collect();
        assert!(Arc::new(inherited).validate().is_ok());
    }
}
