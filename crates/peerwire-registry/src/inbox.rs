//! Per-entry event sequencing.
//!
//! Each registry entry owns an inbox. A transition is pushed in; if nobody
//! is working the inbox, the pushing thread becomes its worker and handles
//! queued events one at a time until it runs dry. Anyone else, including
//! the worker re-entering from inside a listener, only enqueues. Events for
//! one entry are therefore handled strictly in arrival order and never
//! concurrently, and no lock is held while they are handled.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connection::ConnectionEvent;

#[derive(Default)]
struct Queue {
    pending: VecDeque<ConnectionEvent>,
    working: bool,
}

#[derive(Default)]
pub(crate) struct Inbox {
    queue: Mutex<Queue>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `event` and, if the inbox is idle, handle everything queued
    /// with `handle`.
    ///
    /// Returns false if the event was left for the current worker, which
    /// handles it with its own handler.
    pub(crate) fn deliver(
        &self,
        event: ConnectionEvent,
        mut handle: impl FnMut(ConnectionEvent),
    ) -> bool {
        let mut queue = self.lock();
        queue.pending.push_back(event);
        if queue.working {
            return false;
        }
        queue.working = true;

        loop {
            let Some(next) = queue.pending.pop_front() else {
                queue.working = false;
                return true;
            };
            drop(queue);
            // Reset on unwind so a panicking handler cannot wedge the inbox.
            let idle_on_unwind = IdleOnUnwind(self);
            handle(next);
            std::mem::forget(idle_on_unwind);
            queue = self.lock();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct IdleOnUnwind<'a>(&'a Inbox);

impl Drop for IdleOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.lock().working = false;
    }
}
