//! Serialized access to a room
//!
//! A [`Transaction`] holds the room's re-entrant lock for the duration of
//! one public operation. Nested operations open nested transactions on the
//! same thread; only the outermost one, when it ends, sends the service calls
//! queued in the [`Outbox`] and publishes the room snapshot if it changed.

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;

use parking_lot::{Mutex, ReentrantMutexGuard};
use schedy_core::{ServiceCall, ServiceCaller};
use tracing::{trace, warn};

use crate::room::{Room, RoomState};

/// Service calls made by actors while room state is borrowed
///
/// Sending is deferred so a host dispatching synchronously can call back
/// into the room without finding its state borrowed.
#[derive(Default)]
pub(crate) struct Outbox {
    calls: Mutex<VecDeque<ServiceCall>>,
}

impl Outbox {
    pub(crate) fn pop(&self) -> Option<ServiceCall> {
        self.calls.lock().pop_front()
    }
}

impl ServiceCaller for Outbox {
    fn call(&self, call: ServiceCall) {
        trace!(service = %call.service_id(), "Queueing service call");
        self.calls.lock().push_back(call);
    }
}

pub(crate) struct Transaction<'a> {
    room: &'a Room,
    guard: ReentrantMutexGuard<'a, RefCell<RoomState>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(room: &'a Room) -> Self {
        let guard = room.state.lock();
        guard.borrow_mut().depth += 1;
        Self { room, guard }
    }

    /// Borrow the room state; never keep it across calls that may re-enter
    pub(crate) fn state(&self) -> RefMut<'_, RoomState> {
        self.guard.borrow_mut()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let outermost = matches!(self.guard.try_borrow(), Ok(state) if state.depth == 1);
        if outermost {
            self.room.flush_outbox();
        }

        let publication = match self.guard.try_borrow_mut() {
            Ok(mut state) => {
                state.depth = state.depth.saturating_sub(1);
                if state.depth == 0 {
                    self.room.take_publication(&mut state)
                } else {
                    None
                }
            }
            Err(_) => {
                warn!(room = %self.room, "Room state still borrowed when ending transaction");
                None
            }
        };
        if let Some(snapshot) = publication {
            self.room.publish(&snapshot);
        }
    }
}
