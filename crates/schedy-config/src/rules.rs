//! Construction of rules and schedules from their configuration

use std::sync::Arc;

use schedy_schedule::{expand_range_spec, parse_rule_time, Constraints, PartialDate, Rule, Schedule};
use tracing::trace;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{RangeSpec, RuleConfig};

fn range(spec: &RangeSpec, min: i32, max: i32, key: &str) -> ConfigResult<Vec<i32>> {
    expand_range_spec(&spec.as_spec(), min, max)
        .map(|set| set.into_iter().collect())
        .map_err(|e| ConfigError::invalid(key, e))
}

fn unsigned(values: Vec<i32>) -> impl Iterator<Item = u32> {
    values.into_iter().filter_map(|v| u32::try_from(v).ok())
}

fn partial_date(date: &PartialDate, key: &str) -> ConfigResult<PartialDate> {
    date.validate().map_err(|e| ConfigError::invalid(key, e))?;
    if let Some(year) = date.year {
        if !(1970..=2099).contains(&year) {
            return Err(ConfigError::invalid(key, "year must be within 1970-2099"));
        }
    }
    Ok(*date)
}

fn constraints(rule: &RuleConfig, key: &str) -> ConfigResult<Constraints> {
    let mut constraints = Constraints::new();
    if let Some(spec) = &rule.years {
        constraints = constraints.with_years(range(spec, 1970, 2099, &format!("{key}.years"))?);
    }
    if let Some(spec) = &rule.months {
        let months = range(spec, 1, 12, &format!("{key}.months"))?;
        constraints = constraints.with_months(unsigned(months));
    }
    if let Some(spec) = &rule.days {
        let days = range(spec, 1, 31, &format!("{key}.days"))?;
        constraints = constraints.with_days(unsigned(days));
    }
    if let Some(spec) = &rule.weeks {
        let weeks = range(spec, 1, 53, &format!("{key}.weeks"))?;
        constraints = constraints.with_weeks(unsigned(weeks));
    }
    if let Some(spec) = &rule.weekdays {
        let weekdays = range(spec, 1, 7, &format!("{key}.weekdays"))?;
        constraints = constraints.with_weekdays(unsigned(weekdays));
    }
    if let Some(date) = &rule.start_date {
        constraints = constraints.with_start_date(partial_date(date, &format!("{key}.start_date"))?);
    }
    if let Some(date) = &rule.end_date {
        constraints = constraints.with_end_date(partial_date(date, &format!("{key}.end_date"))?);
    }
    Ok(constraints)
}

/// Build one rule; `key` is the dotted path of the rule for error messages
pub fn build_rule(rule: &RuleConfig, key: &str) -> ConfigResult<Rule> {
    let mut builder = Rule::builder().constraints(constraints(rule, key)?);

    if let Some(name) = &rule.name {
        builder = builder.name(name);
    }

    if let Some(start) = &rule.start {
        let start_key = format!("{key}.start");
        let (time, days) =
            parse_rule_time(start).map_err(|e| ConfigError::invalid(&start_key, e))?;
        if days != 0 {
            return Err(ConfigError::invalid(start_key, "start time can't be shifted by days"));
        }
        if let Some(time) = time {
            builder = builder.start(time);
        }
    }

    if let Some(end) = &rule.end {
        let end_key = format!("{key}.end");
        let (time, days) = parse_rule_time(end).map_err(|e| ConfigError::invalid(&end_key, e))?;
        if days < 0 {
            return Err(ConfigError::invalid(end_key, "end time can't be shifted backwards"));
        }
        if let Some(time) = time {
            builder = builder.end(time);
        }
        if end.contains('d') {
            let days = u32::try_from(days).map_err(|e| ConfigError::invalid(&end_key, e))?;
            builder = builder.end_plus_days(days);
        }
    }

    if let Some(expression) = &rule.expression {
        builder = builder.expression(expression.trim());
    }
    if let Some(value) = &rule.value {
        builder = builder.value(value.clone());
    }
    if let Some(rules) = &rule.rules {
        builder = builder.sub_schedule(build_schedule(None, rules, &format!("{key}.rules"))?);
    }

    let built = builder.build().map_err(|e| ConfigError::invalid(key, e))?;
    trace!(rule = %built, key, "Built rule");
    Ok(built)
}

/// Build a schedule from a rule list
pub fn build_schedule(name: Option<&str>, rules: &[RuleConfig], key: &str) -> ConfigResult<Schedule> {
    let rules = rules
        .iter()
        .enumerate()
        .map(|(index, rule)| build_rule(rule, &format!("{key}[{index}]")).map(Arc::new))
        .collect::<ConfigResult<Vec<_>>>()?;
    Ok(Schedule::new(name.map(str::to_string), rules))
}

/// Build a schedule and check that every path through it yields something
pub fn build_validated_schedule(
    name: &str,
    rules: &[RuleConfig],
    key: &str,
) -> ConfigResult<Arc<Schedule>> {
    let schedule = Arc::new(build_schedule(Some(name), rules, key)?);
    schedule.validate().map_err(|e| ConfigError::invalid(key, e))?;
    Ok(schedule)
}

/// Visit the source of every expression of a schedule, nested ones included
pub fn for_each_expression<F>(schedule: &Schedule, f: &mut F)
where
    F: FnMut(&Rule, &str),
{
    for rule in schedule.rules() {
        if let Some(schedy_schedule::RuleBody::Expression(expression)) = rule.body() {
            f(rule, expression.source());
        }
        if let Some(sub) = rule.sub_schedule() {
            for_each_expression(sub, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use serde_json::json;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn make_test_rule(yaml: &str) -> ConfigResult<Rule> {
        let config: RuleConfig = serde_yaml::from_str(yaml).unwrap();
        build_rule(&config, "rooms.living.schedule[0]")
    }

    #[test]
    fn test_time_window_and_weekdays() {
        let rule = make_test_rule("{start: '22:00', end: '06:00', weekdays: 1-5, v: 17}").unwrap();
        assert_eq!(rule.start_time(), NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert_eq!(rule.end_plus_days(), 1);
        // 2026-10-16 is a Friday, 2026-10-17 a Saturday
        assert!(rule.matches(at(2026, 10, 17, 5, 0)));
        assert!(!rule.matches(at(2026, 10, 17, 22, 30)));
    }

    #[test]
    fn test_explicit_end_days() {
        let rule = make_test_rule("{start: '08:00', end: '08:00+2d', weekdays: 1, v: 1}").unwrap();
        assert_eq!(rule.end_plus_days(), 2);
    }

    #[test]
    fn test_shifted_times_rejected() {
        let err = make_test_rule("{end: '-1d', v: 1}").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "rooms.living.schedule[0].end")
        );
        assert!(make_test_rule("{start: '07:00+1d', v: 1}").is_err());
        assert!(make_test_rule("{start: '7h', v: 1}").is_err());
    }

    #[test]
    fn test_range_spec_errors_carry_key() {
        let err = make_test_rule("{months: 0-3, v: 1}").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "rooms.living.schedule[0].months")
        );
    }

    #[test]
    fn test_expression_and_value_rejected() {
        assert!(make_test_rule("{x: '1', v: 1}").is_err());
    }

    #[test]
    fn test_partial_dates() {
        let rule = make_test_rule(
            "{start_date: {month: 12, day: 24}, end_date: {month: 12, day: 26}, v: 1}",
        )
        .unwrap();
        assert!(rule.matches(at(2026, 12, 25, 12, 0)));
        assert!(!rule.matches(at(2026, 12, 27, 12, 0)));
        assert!(make_test_rule("{start_date: {month: 13}, v: 1}").is_err());
        assert!(make_test_rule("{start_date: {year: 1960}, v: 1}").is_err());
    }

    #[test]
    fn test_nested_rules_and_validation() {
        let rules: Vec<RuleConfig> = serde_yaml::from_str(
            "- weekdays: 6-7\n  rules:\n    - {start: '09:00', end: '12:00', v: 20}\n    - x: Next()\n- v: 16\n",
        )
        .unwrap();
        let schedule = build_validated_schedule("living", &rules, "rooms.living.schedule").unwrap();
        assert_eq!(schedule.rules().len(), 2);
        assert!(schedule.rules()[0].is_sub_schedule_rule());
        assert_eq!(schedule.name(), Some("living"));

        let mut sources = Vec::new();
        for_each_expression(&schedule, &mut |_, source| sources.push(source.to_string()));
        assert_eq!(sources, vec!["Next()"]);
    }

    #[test]
    fn test_path_without_value_rejected() {
        let rules: Vec<RuleConfig> =
            serde_yaml::from_str("- rules:\n    - {start: '09:00', end: '12:00'}\n").unwrap();
        let err = build_validated_schedule("living", &rules, "rooms.living.schedule").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_values_keep_their_type() {
        let rule = make_test_rule("{v: 'on'}").unwrap();
        assert!(
            matches!(rule.body(), Some(schedy_schedule::RuleBody::Value(v)) if *v == json!("on"))
        );
    }
}
