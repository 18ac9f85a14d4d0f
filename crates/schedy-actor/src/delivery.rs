//! Value delivery state machine
//!
//! ```text
//!            request             tick(left > 0)
//!   Idle ─────────────▶ Sending ◀──────────────┐
//!    ▲                    │  └─────────────────┘
//!    │  observe(wanted)   │ tick(0)
//!    ├────────────────────┤
//!    │                    ▼
//!    └──────────────── GaveUp
//! ```
//!
//! The machine itself performs no I/O. [`Actor`](crate::Actor) pushes the
//! value whenever [`tick`](DeliveryState::tick) answers [`Tick::Send`] and
//! reports the timer it armed for the next attempt.

use schedy_core::TimerHandle;
use serde_json::Value;

/// What a firing resend timer has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Push the wanted value, then arm a timer for `left_tries - 1`
    Send { left_tries: u32 },
    /// The budget is spent; nothing is pushed anymore
    GaveUp,
    /// The timer belongs to a cancelled loop
    Stale,
}

/// Delivery bookkeeping of one actor
#[derive(Debug, Clone, Default)]
pub struct DeliveryState {
    current: Option<Value>,
    wanted: Option<Value>,
    timer: Option<TimerHandle>,
    gave_up: bool,
    generation: u64,
}

impl DeliveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value observed on the entity
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    /// Last value this engine decided to push
    pub fn wanted(&self) -> Option<&Value> {
        self.wanted.as_ref()
    }

    /// Set the wanted value without sending, e.g. when restoring persisted state
    pub fn set_wanted(&mut self, value: Option<Value>) {
        self.wanted = value;
    }

    /// Generation of the running retry loop
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_sending(&self) -> bool {
        self.timer.is_some()
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// Current and wanted values are known and equal while nothing is in flight
    pub fn is_synced(&self, eq: impl Fn(&Value, &Value) -> bool) -> bool {
        if self.timer.is_some() || self.gave_up {
            return false;
        }
        match (&self.current, &self.wanted) {
            (Some(current), Some(wanted)) => eq(current, wanted),
            _ => false,
        }
    }

    /// Make `value` the wanted value; returns whether a retry loop must start
    ///
    /// Nothing needs to be sent if the actor is already synced to `value`, or
    /// if a retry loop for an equal value is running, unless `force` is set.
    pub fn request(&mut self, value: Value, force: bool, eq: impl Fn(&Value, &Value) -> bool) -> bool {
        let same_in_flight = self.timer.is_some()
            && self.wanted.as_ref().map_or(false, |wanted| eq(wanted, &value));
        self.wanted = Some(value);
        if force {
            return true;
        }
        !(same_in_flight || self.is_synced(&eq))
    }

    /// Start a new retry loop
    ///
    /// Returns the timer of the previous loop, which the caller must cancel,
    /// and the generation the new loop's timers have to carry.
    pub fn begin(&mut self) -> (Option<TimerHandle>, u64) {
        self.generation = self.generation.wrapping_add(1);
        (self.timer.take(), self.generation)
    }

    /// A resend timer of `generation` fired with `left_tries` attempts left
    pub fn tick(&mut self, generation: u64, left_tries: u32) -> Tick {
        if generation != self.generation {
            return Tick::Stale;
        }
        self.timer = None;
        if left_tries == 0 {
            self.gave_up = true;
            return Tick::GaveUp;
        }
        self.gave_up = false;
        Tick::Send { left_tries }
    }

    /// Record the timer armed for the next attempt of the running loop
    pub fn armed(&mut self, handle: TimerHandle) {
        self.timer = Some(handle);
    }

    /// Record a value observed on the entity
    ///
    /// A value equal to the wanted one ends any retry loop and clears GaveUp.
    /// Returns the timer the caller must cancel, if any.
    pub fn observe(&mut self, value: Value, eq: impl Fn(&Value, &Value) -> bool) -> Option<TimerHandle> {
        let acknowledged = self.wanted.as_ref().map_or(false, |wanted| eq(wanted, &value));
        self.current = Some(value);
        if !acknowledged {
            return None;
        }
        self.gave_up = false;
        self.generation = self.generation.wrapping_add(1);
        self.timer.take()
    }

    /// Stop the running loop without acknowledgement
    pub fn cancel(&mut self) -> Option<TimerHandle> {
        self.generation = self.generation.wrapping_add(1);
        self.timer.take()
    }
}
