//! Parsing of time strings and range specs used in rule definitions

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::NaiveTime;
use regex::Regex;

use crate::error::{ScheduleError, ScheduleResult};

static TIME_RE: OnceLock<Regex> = OnceLock::new();
static RULE_TIME_RE: OnceLock<Regex> = OnceLock::new();
static RANGE_RE: OnceLock<Regex> = OnceLock::new();

fn time_re() -> &'static Regex {
    TIME_RE.get_or_init(|| {
        Regex::new(r"^\s*(\d{1,2}):(\d{2})(?::(\d{2}))?\s*$").expect("valid time regex")
    })
}

fn rule_time_re() -> &'static Regex {
    RULE_TIME_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:(\d{1,2}):(\d{2})(?::(\d{2}))?)?\s*(?:([+-])\s*(\d+)\s*d)?\s*$")
            .expect("valid rule time regex")
    })
}

fn range_re() -> &'static Regex {
    RANGE_RE.get_or_init(|| {
        Regex::new(r"^(?:(\*)|(-?\d+)(?:-(-?\d+))?)(?:/(\d+))?$").expect("valid range regex")
    })
}

fn build_time(
    hour: Option<&str>,
    minute: Option<&str>,
    second: Option<&str>,
) -> Option<NaiveTime> {
    let hour = hour?.parse().ok()?;
    let minute = minute?.parse().ok()?;
    let second = second.map_or(Some(0), |s| s.parse().ok())?;
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// Parse a time of day in `HH:MM[:SS]` format
pub fn parse_time(s: &str) -> ScheduleResult<NaiveTime> {
    let caps = time_re()
        .captures(s)
        .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))?;
    build_time(
        caps.get(1).map(|m| m.as_str()),
        caps.get(2).map(|m| m.as_str()),
        caps.get(3).map(|m| m.as_str()),
    )
    .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))
}

/// Parse a rule time in `[HH:MM[:SS]][{+-}Nd]` format
///
/// Returns the time (if given) and the signed day shift (0 if not given).
pub fn parse_rule_time(s: &str) -> ScheduleResult<(Option<NaiveTime>, i64)> {
    let invalid = || ScheduleError::InvalidRuleTime(s.to_string());
    let caps = rule_time_re().captures(s).ok_or_else(invalid)?;

    let time = match caps.get(1) {
        Some(hour) => Some(
            build_time(
                Some(hour.as_str()),
                caps.get(2).map(|m| m.as_str()),
                caps.get(3).map(|m| m.as_str()),
            )
            .ok_or_else(invalid)?,
        ),
        None => None,
    };

    let days = match (caps.get(4), caps.get(5)) {
        (Some(sign), Some(n)) => {
            let n: i64 = n.as_str().parse().map_err(|_| invalid())?;
            if sign.as_str() == "-" {
                -n
            } else {
                n
            }
        }
        _ => 0,
    };

    if time.is_none() && caps.get(4).is_none() {
        return Err(invalid());
    }
    Ok((time, days))
}

/// Expand a range spec into the set of integers it covers
///
/// A spec is a comma-separated list of `*`, `a`, `a-b`, optionally followed by
/// `/step`. A leading `!` inverts the whole spec. Every number must lie within
/// `min..=max`.
pub fn expand_range_spec(spec: &str, min: i32, max: i32) -> ScheduleResult<BTreeSet<i32>> {
    let invalid = |reason: String| ScheduleError::InvalidRangeSpec {
        spec: spec.to_string(),
        reason,
    };

    let trimmed = spec.trim();
    let (inverted, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, trimmed),
    };
    if body.is_empty() {
        return Err(invalid("empty spec".to_string()));
    }

    let mut values = BTreeSet::new();
    for part in body.split(',') {
        let part: String = part.chars().filter(|c| !c.is_whitespace()).collect();
        let caps = range_re()
            .captures(&part)
            .ok_or_else(|| invalid(format!("can't parse '{part}'")))?;

        let (start, end) = if caps.get(1).is_some() {
            (min, max)
        } else {
            let start: i32 = caps[2]
                .parse()
                .map_err(|_| invalid(format!("bad number in '{part}'")))?;
            let end = match caps.get(3) {
                Some(end) => end
                    .as_str()
                    .parse()
                    .map_err(|_| invalid(format!("bad number in '{part}'")))?,
                None => start,
            };
            (start, end)
        };
        let step: i32 = match caps.get(4) {
            Some(step) => step
                .as_str()
                .parse()
                .map_err(|_| invalid(format!("bad step in '{part}'")))?,
            None => 1,
        };

        if step < 1 {
            return Err(invalid("step must be at least 1".to_string()));
        }
        if start > end {
            return Err(invalid(format!("{start} is greater than {end}")));
        }
        if start < min || end > max {
            return Err(invalid(format!("values must be within {min}-{max}")));
        }

        values.extend((start..=end).step_by(step as usize));
    }

    if inverted {
        values = (min..=max).filter(|v| !values.contains(v)).collect();
    }
    Ok(values)
}
