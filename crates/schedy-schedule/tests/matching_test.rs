//! Window matching properties checked over a grid of rules and instants

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use schedy_schedule::{expand_range_spec, Constraints, Rule};

fn times() -> Vec<NaiveTime> {
    (0..24)
        .step_by(3)
        .flat_map(|h| [0, 30].map(move |m| NaiveTime::from_hms_opt(h, m, 0).unwrap()))
        .collect()
}

fn window(rule: &Rule) -> Duration {
    let start = NaiveDate::from_ymd_opt(2026, 1, 1)
        .unwrap()
        .and_time(rule.start_time());
    let end = (start.date() + Duration::days(i64::from(rule.end_plus_days())))
        .and_time(rule.end_time());
    end - start
}

fn occurrence(rule: &Rule, day: NaiveDate) -> NaiveDateTime {
    day.and_time(rule.start_time())
}

#[test]
fn test_midnight_wrap_always_has_end_plus_days() {
    for start in times() {
        for end in times() {
            let rule = Rule::builder()
                .start(start)
                .end(end)
                .constraints(Constraints::new().with_weekdays([3]))
                .value(1)
                .build()
                .unwrap();
            if end <= start {
                assert!(rule.end_plus_days() >= 1, "{rule}");
            }
        }
    }
}

#[test]
fn test_window_duration_boundaries() {
    // Wednesdays only; 2026-10-14 is a Wednesday
    let wednesday = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
    for start in times() {
        for end in times() {
            let rule = Rule::builder()
                .start(start)
                .end(end)
                .constraints(Constraints::new().with_weekdays([3]))
                .value(1)
                .build()
                .unwrap();
            let open = occurrence(&rule, wednesday);
            let length = window(&rule);
            let tick = Duration::seconds(1);

            assert!(rule.matches(open), "{rule} at {open}");
            assert!(rule.matches(open + length - tick), "{rule} before close");
            assert!(!rule.matches(open + length), "{rule} at close");
            assert!(!rule.matches(open - tick), "{rule} before open");
        }
    }
}

#[test]
fn test_constraint_spec_drives_matching() {
    let weekend: Vec<u32> = expand_range_spec("6-7", 1, 7)
        .unwrap()
        .into_iter()
        .map(|d| d as u32)
        .collect();
    let rule = Rule::builder()
        .start(NaiveTime::from_hms_opt(8, 0, 0).unwrap())
        .end(NaiveTime::from_hms_opt(23, 0, 0).unwrap())
        .constraints(Constraints::new().with_weekdays(weekend))
        .value(22)
        .build()
        .unwrap();

    let saturday = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
    let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    assert!(rule.matches(saturday.and_hms_opt(9, 0, 0).unwrap()));
    assert!(rule.matches((saturday + Duration::days(1)).and_hms_opt(22, 59, 59).unwrap()));
    assert!(!rule.matches(monday.and_hms_opt(9, 0, 0).unwrap()));
}
