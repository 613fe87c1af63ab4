//! Single-fire completion event.
//!
//! Decouples "the collector logically finished" from "the OS thread exited":
//! finalization waits on the event before joining threads, so the join cannot
//! race with the collector's last actions.

use parking_lot::{Condvar, Mutex};

/// A one-shot event: starts unset, can be set exactly once, never resets.
#[derive(Debug, Default)]
pub struct Event {
    fired: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    /// Create an unset event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the event, waking all current and future waiters.
    pub fn set(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        // Notify while holding the lock so a waiter between its check and its
        // sleep cannot miss the wakeup.
        self.condvar.notify_all();
    }

    /// Block until the event fires. Returns immediately if already fired.
    pub fn wait(&self) {
        let mut fired = self.fired.lock();
        while !*fired {
            self.condvar.wait(&mut fired);
        }
    }

    /// True if the event has fired.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.fired.lock()
    }
}
