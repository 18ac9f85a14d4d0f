//! Room settings and re-scheduling delays

use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};

use crate::error::{RoomError, RoomResult};

/// How long a manual override stays before the schedule takes over again
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReschedulingDelay {
    /// Minutes from now; zero disables re-scheduling
    Minutes(f64),
    /// An absolute instant
    Until(NaiveDateTime),
}

impl ReschedulingDelay {
    /// The instant the delay ends, None when it disables re-scheduling
    ///
    /// Fails when the deadline can't be represented.
    pub fn deadline(&self, now: NaiveDateTime) -> RoomResult<Option<NaiveDateTime>> {
        match *self {
            ReschedulingDelay::Minutes(minutes) if minutes > 0.0 => {
                let out_of_range = || RoomError::DelayOutOfRange(self.to_string());
                let millis = (minutes * 60_000.0).round();
                if !millis.is_finite() || millis >= i64::MAX as f64 {
                    return Err(out_of_range());
                }
                let delta = TimeDelta::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
                now.checked_add_signed(delta).map(Some).ok_or_else(out_of_range)
            }
            ReschedulingDelay::Minutes(_) => Ok(None),
            ReschedulingDelay::Until(when) => Ok(Some(when)),
        }
    }
}

impl fmt::Display for ReschedulingDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReschedulingDelay::Minutes(minutes) => write!(f, "{minutes}min"),
            ReschedulingDelay::Until(when) => write!(f, "until {when}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub name: String,
    pub app_name: String,
    pub friendly_name: Option<String>,
    /// Whether values changed at an actor are kept instead of reverted
    pub allow_manual_changes: bool,
    /// Whether a value changed at one actor is pushed to the others
    pub replicate_changes: bool,
    /// Default delay of manual overrides, in minutes
    pub rescheduling_delay: Option<f64>,
}

impl RoomSettings {
    pub fn new(app_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app_name: app_name.into(),
            friendly_name: None,
            allow_manual_changes: true,
            replicate_changes: true,
            rescheduling_delay: None,
        }
    }

    pub fn with_friendly_name(mut self, friendly_name: impl Into<String>) -> Self {
        self.friendly_name = Some(friendly_name.into());
        self
    }

    pub fn with_rescheduling_delay(mut self, minutes: f64) -> Self {
        self.rescheduling_delay = (minutes > 0.0).then_some(minutes);
        self
    }

    pub fn with_manual_changes(mut self, allow: bool) -> Self {
        self.allow_manual_changes = allow;
        self
    }

    pub fn with_replication(mut self, replicate: bool) -> Self {
        self.replicate_changes = replicate;
        self
    }

    /// The configured default delay, if any
    pub fn default_delay(&self) -> Option<ReschedulingDelay> {
        self.rescheduling_delay.map(ReschedulingDelay::Minutes)
    }

    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }
}
