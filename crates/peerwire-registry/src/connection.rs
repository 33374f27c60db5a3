//! Connection handle contract: what the registry needs from a negotiated link.
//!
//! The transport owns the socket and drives the handshake. The registry only
//! holds a reference to the handle and learns about transitions through
//! [`WireConnection::subscribe`]; it never polls.
//!
//! [`BasicWireConnection`] is a ready-made handle a transport can embed: it
//! carries the one-way Pending → Active → Closed state machine and fans
//! transitions out to observers in order.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use peerwire_core::SubProtocolIdentifier;
use tokio::sync::watch;

/// A lifecycle transition reported by a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake finished and the capability set is now fixed.
    Negotiated,
    /// The link is gone, from our side or the peer's.
    Closed,
}

/// Observable state of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Active,
    Closed,
}

/// Callback invoked on each transition of a handle.
pub type TransitionObserver = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Shared reference to a connection handle, as held by the registry.
pub type ConnectionHandle = Arc<dyn WireConnection>;

/// One negotiated (or negotiating) peer link.
pub trait WireConnection: Send + Sync {
    /// Sub-protocols agreed with the peer. Empty until negotiation completes.
    fn agreed_capabilities(&self) -> Vec<SubProtocolIdentifier>;

    /// Whether the agreed set contains `capability`.
    fn supports(&self, capability: &SubProtocolIdentifier) -> bool {
        self.agreed_capabilities().contains(capability)
    }

    /// Register an observer for transitions.
    ///
    /// An observer registered after a transition already happened must be
    /// replayed the transitions it missed, in order, so late subscribers see
    /// the same history as early ones.
    ///
    /// Observers may be invoked inline from the thread driving a transition,
    /// including re-entrantly from inside another observer; the registry's
    /// observer tolerates both.
    fn subscribe(&self, observer: TransitionObserver);
}

// ── BasicWireConnection ───────────────────────────────────────────────────────

enum Job {
    Event(ConnectionEvent),
    Subscribe(TransitionObserver),
}

struct Inner {
    state: ConnectionState,
    capabilities: Vec<SubProtocolIdentifier>,
    observers: Vec<TransitionObserver>,
    /// Events already handed to the observer list, replayed to late subscribers.
    delivered: Vec<ConnectionEvent>,
    queue: VecDeque<Job>,
    draining: bool,
}

/// Reference handle implementation with a queued, ordered observer fan-out.
///
/// Transitions may be driven from any thread, including from inside an
/// observer. Whichever thread finds the queue idle delivers all queued
/// jobs, so every observer sees events in transition order and no observer
/// runs while the internal lock is held.
///
/// A consequence: if another thread is already delivering, `negotiated()`
/// and `close()` only enqueue and return. The state change is visible at
/// once; the observers for it run later on the delivering thread.
pub struct BasicWireConnection {
    label: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl BasicWireConnection {
    pub fn new(label: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Pending);
        Self {
            label: label.into(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Pending,
                capabilities: Vec::new(),
                observers: Vec::new(),
                delivered: Vec::new(),
                queue: VecDeque::new(),
                draining: false,
            }),
            state_tx,
        }
    }

    /// Convenience for building a registry handle directly.
    pub fn handle(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(label))
    }

    /// Free-form label used in logs, e.g. the peer address.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Receiver that tracks the handle's state, for async consumers.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Mark the handshake complete with the agreed capabilities.
    ///
    /// Returns false if the handle was not pending.
    pub fn negotiated(&self, capabilities: Vec<SubProtocolIdentifier>) -> bool {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Pending {
            return false;
        }
        inner.state = ConnectionState::Active;
        inner.capabilities = capabilities;
        inner.queue.push_back(Job::Event(ConnectionEvent::Negotiated));
        self.state_tx.send_replace(ConnectionState::Active);
        self.drain(inner);
        true
    }

    /// Mark the link closed. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Closed {
            return false;
        }
        inner.state = ConnectionState::Closed;
        inner.queue.push_back(Job::Event(ConnectionEvent::Closed));
        self.state_tx.send_replace(ConnectionState::Closed);
        self.drain(inner);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain<'a>(&'a self, mut inner: MutexGuard<'a, Inner>) {
        if inner.draining {
            return;
        }
        inner.draining = true;

        loop {
            let Some(job) = inner.queue.pop_front() else {
                inner.draining = false;
                return;
            };
            let (targets, events) = match job {
                Job::Event(event) => {
                    inner.delivered.push(event);
                    (inner.observers.clone(), vec![event])
                }
                Job::Subscribe(observer) => {
                    inner.observers.push(observer.clone());
                    (vec![observer], inner.delivered.clone())
                }
            };
            drop(inner);

            for event in events {
                for observer in &targets {
                    if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                        tracing::warn!(conn = %self.label, ?event, "transition observer panicked");
                    }
                }
            }

            inner = self.lock();
        }
    }
}

impl WireConnection for BasicWireConnection {
    fn agreed_capabilities(&self) -> Vec<SubProtocolIdentifier> {
        self.lock().capabilities.clone()
    }

    fn subscribe(&self, observer: TransitionObserver) {
        let mut inner = self.lock();
        inner.queue.push_back(Job::Subscribe(observer));
        self.drain(inner);
    }
}

impl fmt::Debug for BasicWireConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("BasicWireConnection")
            .field("label", &self.label)
            .field("state", &inner.state)
            .field("capabilities", &inner.capabilities)
            .finish()
    }
}
