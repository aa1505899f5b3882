//! Blocking signal used by synchronous loads.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// An event a thread can block on until another thread signals it.
///
/// Auto-reset events clear themselves when a waiter wakes; manual-reset
/// events stay signaled until [`WaitableEvent::reset`].
#[derive(Debug)]
pub struct WaitableEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
    manual_reset: bool,
}

impl WaitableEvent {
    /// Creates an event.
    pub fn new(manual_reset: bool, initially_signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(initially_signaled),
            condvar: Condvar::new(),
            manual_reset,
        }
    }

    /// Signals the event, waking waiters.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        if self.manual_reset {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }

    /// Clears the signal.
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Returns true if the event is currently signaled.
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Blocks until the event is signaled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
        if !self.manual_reset {
            *signaled = false;
        }
    }

    /// Blocks until the event is signaled or `timeout` elapses. Returns true
    /// if the event was signaled.
    pub fn timed_wait(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        let was_signaled = *signaled;
        if was_signaled && !self.manual_reset {
            *signaled = false;
        }
        was_signaled
    }
}
