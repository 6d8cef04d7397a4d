//! Single-slot, latest-wins trigger queue.
//!
//! Front ends (a file watcher, a CLI loop) submit triggers faster than the
//! engine can act on them. Only the newest pending trigger matters: while the
//! handler is busy, submissions overwrite each other and the survivor runs
//! once the handler returns.
//!
//! Library API for long-lived front ends that embed the engine; the
//! one-shot `patchgate` binary handles a single request and never queues.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

#[derive(Debug)]
struct Slot<T> {
    pending: Option<T>,
    closed: bool,
}

#[derive(Debug)]
pub struct TriggerSlot<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for TriggerSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TriggerSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue `trigger`, returning the one it displaced.
    ///
    /// Submissions after [`close`](Self::close) are dropped and returned.
    pub fn submit(&self, trigger: T) -> Option<T> {
        let mut slot = self.lock();
        if slot.closed {
            return Some(trigger);
        }
        let displaced = slot.pending.replace(trigger);
        if displaced.is_some() {
            debug!("trigger coalesced");
        }
        self.ready.notify_one();
        displaced
    }

    /// Stop the worker. A trigger already queued is still delivered.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Block until a trigger is queued. `None` once closed and drained.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.lock();
        loop {
            if let Some(trigger) = slot.pending.take() {
                return Some(trigger);
            }
            if slot.closed {
                return None;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `handler` for each trigger until the slot is closed and drained.
/// Returns how many triggers were handled.
pub fn run_worker<T, F>(slot: &TriggerSlot<T>, mut handler: F) -> usize
where
    F: FnMut(T),
{
    let mut handled = 0;
    while let Some(trigger) = slot.take() {
        handler(trigger);
        handled += 1;
    }
    debug!(handled, "trigger worker stopped");
    handled
}
