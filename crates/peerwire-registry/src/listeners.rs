//! Connection and disconnection listener dispatch.
//!
//! Each registry owns one dispatcher. Listeners run synchronously on the
//! thread that detected the transition, never under the table lock. A
//! panicking listener is logged and counted; the rest still run.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::connection::ConnectionHandle;
use crate::id::ConnectionId;

/// Callback notified of a connection transition.
pub type Listener = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerKind {
    Connect,
    Disconnect,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

#[derive(Default)]
pub(crate) struct ListenerDispatcher {
    connect: RwLock<Vec<Listener>>,
    disconnect: RwLock<Vec<Listener>>,
    failures: AtomicU64,
}

impl ListenerDispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Identical listeners are not de-duplicated.
    pub(crate) fn add(&self, kind: ListenerKind, listener: Listener) {
        self.list(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Invoke every listener of `kind` in registration order.
    /// Returns how many of them failed.
    pub(crate) fn dispatch(
        &self,
        kind: ListenerKind,
        id: &ConnectionId,
        conn: &ConnectionHandle,
    ) -> usize {
        // Copy out so listeners may register further listeners.
        let listeners = self
            .list(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failed = 0;
        for (index, listener) in listeners.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(conn))) {
                failed += 1;
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    id = %id,
                    event = %kind,
                    listener = index,
                    error = panic_message(payload.as_ref()),
                    "connection listener failed"
                );
            }
        }
        failed
    }

    pub(crate) fn len(&self, kind: ListenerKind) -> usize {
        self.list(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total listener failures since creation.
    pub(crate) fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn list(&self, kind: ListenerKind) -> &RwLock<Vec<Listener>> {
        match kind {
            ListenerKind::Connect => &self.connect,
            ListenerKind::Disconnect => &self.disconnect,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
