//! The public face of the registry.
//!
//! Control flow for one connection:
//!
//! ```text
//! add(handle) ──► id minted ──► PENDING entry ──► subscribe to handle
//!                                   │
//!      handle: Negotiated ──► ACTIVE ──► connect listeners ──► capability index
//!                                   │
//!      handle: Closed ──────► removed ──► disconnect listeners
//! ```
//!
//! A handle that closes before negotiating is removed without a connect
//! event. Listeners always run outside the table lock, after the transition
//! has been applied. Transitions for one entry are handled one at a time in
//! arrival order; one that arrives while the entry's listeners are still
//! running is queued, and the thread running them handles it next.

use std::fmt;
use std::sync::{Arc, Weak};

use peerwire_core::{RepositoryConfig, SubProtocolIdentifier};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::error::RegistryError;
use crate::id::{ConnectionId, IdAllocator};
use crate::listeners::{Listener, ListenerDispatcher, ListenerKind};
use crate::table::ConnectionTable;

/// A registry of wire connections, shared by every sub-protocol handler.
pub trait ConnectionRepository: Send + Sync {
    /// Register a connection and return its identifier.
    ///
    /// Fails with [`RegistryError::Closed`] once the repository is closed.
    fn add(&self, connection: ConnectionHandle) -> Result<ConnectionId, RegistryError>;

    /// Look up a connection. Absent for unknown or removed ids, and for
    /// every id once the repository is closed.
    fn get(&self, id: &str) -> Option<ConnectionHandle>;

    /// Every held connection, pending or active. No ordering guarantee.
    fn iter_all(&self) -> Snapshot;

    /// Active connections that agreed `capability`. No ordering guarantee.
    fn iter_supporting(&self, capability: &SubProtocolIdentifier) -> Snapshot;

    /// Shut the repository down. Idempotent.
    fn close(&self);

    /// Called when a connection has finished exchanging capabilities.
    fn add_connection_listener(&self, listener: Listener);

    /// Called when a connection goes away, from either side.
    fn add_disconnection_listener(&self, listener: Listener);
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Point-in-time copy of a set of connections.
///
/// Weakly consistent: it reflects the table at the moment it was taken and
/// is unaffected by later adds or removals. Mutating the repository while
/// walking a snapshot is always safe.
#[derive(Clone, Default)]
pub struct Snapshot {
    connections: Vec<ConnectionHandle>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConnectionHandle> {
        self.connections.iter()
    }
}

impl IntoIterator for Snapshot {
    type Item = ConnectionHandle;
    type IntoIter = std::vec::IntoIter<ConnectionHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.into_iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a ConnectionHandle;
    type IntoIter = std::slice::Iter<'a, ConnectionHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.iter()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("len", &self.len()).finish()
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Counters for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub active: usize,
    pub connection_listeners: usize,
    pub disconnection_listeners: usize,
    pub listener_failures: u64,
    pub closed: bool,
}

// ── In-memory repository ──────────────────────────────────────────────────────

struct Shared {
    ids: IdAllocator,
    table: ConnectionTable,
    listeners: ListenerDispatcher,
}

impl Shared {
    fn on_event(&self, id: &ConnectionId, event: ConnectionEvent) {
        let Some(inbox) = self.table.inbox(id.as_str()) else {
            return;
        };
        // A transition raised while this entry's listeners are running
        // (same thread or another) is queued and handled after them.
        inbox.deliver(event, |event| match event {
            ConnectionEvent::Negotiated => self.promote(id),
            ConnectionEvent::Closed => self.retire(id),
        });
    }

    fn promote(&self, id: &ConnectionId) {
        let Some(handle) = self.table.get(id.as_str()) else {
            return;
        };
        // Ask the handle before taking any registry lock.
        let capabilities = handle.agreed_capabilities();
        let count = capabilities.len();

        let Some(handle) = self.table.activate(id.as_str(), capabilities) else {
            return;
        };
        debug!(id = %id, capabilities = count, "connection active");
        self.listeners.dispatch(ListenerKind::Connect, id, &handle);
        // Visible by capability only after connect listeners ran.
        self.table.publish(id.as_str());
    }

    fn retire(&self, id: &ConnectionId) {
        let Some(handle) = self.table.remove(id.as_str()) else {
            return;
        };
        debug!(id = %id, "connection closed");
        self.listeners.dispatch(ListenerKind::Disconnect, id, &handle);
    }
}

/// Thread-safe, in-process [`ConnectionRepository`].
///
/// Cloning is cheap; clones share the same table and listeners.
#[derive(Clone)]
pub struct MemoryConnectionRepository {
    shared: Arc<Shared>,
}

impl MemoryConnectionRepository {
    /// Sequential ids, no connection limit.
    pub fn new() -> Self {
        Self::with_config(&RepositoryConfig::default())
    }

    pub fn with_config(config: &RepositoryConfig) -> Self {
        debug!(
            id_scheme = ?config.id_scheme,
            max_connections = config.max_connections,
            "creating connection repository"
        );
        Self {
            shared: Arc::new(Shared {
                ids: IdAllocator::new(config.id_scheme),
                table: ConnectionTable::new(config.max_connections),
                listeners: ListenerDispatcher::new(),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.table.is_closed()
    }

    /// Number of held connections, pending or active.
    pub fn len(&self) -> usize {
        self.shared.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.table.contains(id)
    }

    /// Number of connections that finished negotiation.
    pub fn active_count(&self) -> usize {
        self.shared.table.active_count()
    }

    /// Distinct capabilities offered by at least one active connection.
    pub fn capabilities(&self) -> Vec<SubProtocolIdentifier> {
        self.shared.table.capabilities()
    }

    pub fn stats(&self) -> RegistryStats {
        let (pending, active) = self.shared.table.counts();
        RegistryStats {
            pending,
            active,
            connection_listeners: self.shared.listeners.len(ListenerKind::Connect),
            disconnection_listeners: self.shared.listeners.len(ListenerKind::Disconnect),
            listener_failures: self.shared.listeners.failures(),
            closed: self.is_closed(),
        }
    }
}

impl Default for MemoryConnectionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRepository for MemoryConnectionRepository {
    fn add(&self, connection: ConnectionHandle) -> Result<ConnectionId, RegistryError> {
        let id = self.shared.ids.next();
        if let Err(e) = self.shared.table.insert(id.clone(), connection.clone()) {
            warn!(id = %id, error = %e, "connection registration refused");
            return Err(e);
        }
        debug!(id = %id, "connection registered");

        // Subscribe outside the table lock: the handle may replay
        // transitions straight into the observer.
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let observed = id.clone();
        connection.subscribe(Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_event(&observed, event);
            }
        }));

        Ok(id)
    }

    fn get(&self, id: &str) -> Option<ConnectionHandle> {
        self.shared.table.get(id)
    }

    fn iter_all(&self) -> Snapshot {
        Snapshot {
            connections: self.shared.table.all(),
        }
    }

    fn iter_supporting(&self, capability: &SubProtocolIdentifier) -> Snapshot {
        Snapshot {
            connections: self.shared.table.supporting(capability),
        }
    }

    fn close(&self) {
        if let Some(purged) = self.shared.table.close() {
            info!(purged, "connection repository closed");
        }
    }

    fn add_connection_listener(&self, listener: Listener) {
        self.shared.listeners.add(ListenerKind::Connect, listener);
    }

    fn add_disconnection_listener(&self, listener: Listener) {
        self.shared.listeners.add(ListenerKind::Disconnect, listener);
    }
}

impl fmt::Debug for MemoryConnectionRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnectionRepository")
            .field("connection_count", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
