//! Calendar constraints restricting the days a rule applies to

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, ScheduleResult};

/// Direction used to resolve a partial date that doesn't exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateDirection {
    /// Walk forward to the next valid date (lower bounds)
    Forward,
    /// Walk backward to the previous valid date (upper bounds)
    Backward,
}

/// A calendar date with optional fields
///
/// Missing fields are taken from the reference date when resolving, so
/// `{month: 12, day: 24}` means Christmas Eve of whatever year is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl PartialDate {
    pub fn new(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> ScheduleResult<Self> {
        let date = Self { year, month, day };
        date.validate()?;
        Ok(date)
    }

    /// Check that the fields present are within calendar bounds
    pub fn validate(&self) -> ScheduleResult<()> {
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(ScheduleError::InvalidConstraint {
                    kind: "date",
                    reason: format!("month {month} is out of range"),
                });
            }
        }
        if let Some(day) = self.day {
            if !(1..=31).contains(&day) {
                return Err(ScheduleError::InvalidConstraint {
                    kind: "date",
                    reason: format!("day {day} is out of range"),
                });
            }
        }
        if let Some(year) = self.year {
            if NaiveDate::from_ymd_opt(year, 1, 1).is_none() {
                return Err(ScheduleError::InvalidConstraint {
                    kind: "date",
                    reason: format!("year {year} is out of range"),
                });
            }
        }
        Ok(())
    }

    /// Resolve against a reference date
    ///
    /// When the combined fields don't form a valid date (Feb 29 in a common
    /// year, Apr 31), walk day by day in `direction` until one does, wrapping
    /// months and years.
    pub fn resolve(&self, reference: NaiveDate, direction: DateDirection) -> Option<NaiveDate> {
        let mut year = self.year.unwrap_or_else(|| reference.year());
        let mut month = self.month.unwrap_or_else(|| reference.month());
        let mut day = self.day.unwrap_or_else(|| reference.day());

        // Any month has a valid day within 31 steps
        for _ in 0..62 {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
            match direction {
                DateDirection::Forward => {
                    day += 1;
                    if day > 31 {
                        day = 1;
                        month += 1;
                        if month > 12 {
                            month = 1;
                            year += 1;
                        }
                    }
                }
                DateDirection::Backward => {
                    if day <= 1 {
                        day = 31;
                        if month <= 1 {
                            month = 12;
                            year -= 1;
                        } else {
                            month -= 1;
                        }
                    } else {
                        day -= 1;
                    }
                }
            }
        }
        None
    }
}

/// The set of calendar constraints of a rule
///
/// Every constraint present must hold for a date to be accepted. Weekdays are
/// numbered 1 (Monday) to 7 (Sunday). Weeks and years are those of the ISO
/// week date, so 2026-12-31 is in week 53 of 2026 but 2024-12-31 is in week 1
/// of 2025.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraints {
    pub years: Option<BTreeSet<i32>>,
    pub months: Option<BTreeSet<u32>>,
    pub days: Option<BTreeSet<u32>>,
    pub weeks: Option<BTreeSet<u32>>,
    pub weekdays: Option<BTreeSet<u32>>,
    pub start_date: Option<PartialDate>,
    pub end_date: Option<PartialDate>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.years = Some(years.into_iter().collect());
        self
    }

    pub fn with_months(mut self, months: impl IntoIterator<Item = u32>) -> Self {
        self.months = Some(months.into_iter().collect());
        self
    }

    pub fn with_days(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.days = Some(days.into_iter().collect());
        self
    }

    pub fn with_weeks(mut self, weeks: impl IntoIterator<Item = u32>) -> Self {
        self.weeks = Some(weeks.into_iter().collect());
        self
    }

    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = u32>) -> Self {
        self.weekdays = Some(weekdays.into_iter().collect());
        self
    }

    pub fn with_start_date(mut self, date: PartialDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn with_end_date(mut self, date: PartialDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Check whether `date` satisfies every constraint
    pub fn check(&self, date: NaiveDate) -> bool {
        fn allowed<T: Ord>(set: &Option<BTreeSet<T>>, value: T) -> bool {
            set.as_ref().map_or(true, |set| set.contains(&value))
        }

        let iso_week = date.iso_week();
        if !allowed(&self.years, iso_week.year())
            || !allowed(&self.months, date.month())
            || !allowed(&self.days, date.day())
            || !allowed(&self.weeks, iso_week.week())
            || !allowed(&self.weekdays, date.weekday().number_from_monday())
        {
            return false;
        }

        if let Some(start) = &self.start_date {
            match start.resolve(date, DateDirection::Forward) {
                Some(start) if date >= start => {}
                _ => return false,
            }
        }
        if let Some(end) = &self.end_date {
            match end.resolve(date, DateDirection::Backward) {
                Some(end) if date <= end => {}
                _ => return false,
            }
        }
        true
    }
}
