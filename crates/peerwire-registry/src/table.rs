//! The authoritative id → entry map plus the capability index.
//!
//! Both maps live behind one lock so every mutation moves them together.
//! The capability index is derived: it only ever holds ids of entries that
//! are present and active, and it is maintained incrementally on promotion
//! and removal. The lifecycle gate is consulted under the same lock, so no
//! insert can slip in behind a close.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use peerwire_core::SubProtocolIdentifier;

use crate::connection::ConnectionHandle;
use crate::error::RegistryError;
use crate::gate::LifecycleGate;
use crate::id::ConnectionId;
use crate::inbox::Inbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Pending,
    Active,
}

struct Entry {
    handle: ConnectionHandle,
    state: EntryState,
    /// Fixed at promotion; empty while pending.
    capabilities: Vec<SubProtocolIdentifier>,
    /// Whether the capability index currently references this entry.
    indexed: bool,
    /// Sequences this entry's transitions and their listener runs.
    inbox: Arc<Inbox>,
}

#[derive(Default)]
struct Tables {
    entries: HashMap<ConnectionId, Entry>,
    by_capability: HashMap<SubProtocolIdentifier, HashSet<ConnectionId>>,
}

impl Tables {
    fn unindex(&mut self, id: &ConnectionId, capabilities: &[SubProtocolIdentifier]) {
        for cap in capabilities {
            if let Some(ids) = self.by_capability.get_mut(cap) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_capability.remove(cap);
                }
            }
        }
    }
}

pub(crate) struct ConnectionTable {
    tables: RwLock<Tables>,
    gate: LifecycleGate,
    /// 0 = unlimited.
    limit: usize,
}

impl ConnectionTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            gate: LifecycleGate::new(),
            limit,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Insert a pending entry.
    pub(crate) fn insert(
        &self,
        id: ConnectionId,
        handle: ConnectionHandle,
    ) -> Result<(), RegistryError> {
        let mut t = self.write();
        if self.gate.is_closed() {
            return Err(RegistryError::Closed);
        }
        if self.limit > 0 && t.entries.len() >= self.limit {
            return Err(RegistryError::Full { limit: self.limit });
        }
        t.entries.insert(
            id,
            Entry {
                handle,
                state: EntryState::Pending,
                capabilities: Vec::new(),
                indexed: false,
                inbox: Arc::new(Inbox::new()),
            },
        );
        Ok(())
    }

    pub(crate) fn get(&self, id: &str) -> Option<ConnectionHandle> {
        self.read().entries.get(id).map(|e| e.handle.clone())
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.read().entries.contains_key(id)
    }

    pub(crate) fn inbox(&self, id: &str) -> Option<Arc<Inbox>> {
        self.read().entries.get(id).map(|e| e.inbox.clone())
    }

    /// PENDING → ACTIVE. The entry is not yet visible by capability; call
    /// [`publish`](Self::publish) once connect listeners have run.
    pub(crate) fn activate(
        &self,
        id: &str,
        capabilities: Vec<SubProtocolIdentifier>,
    ) -> Option<ConnectionHandle> {
        let mut t = self.write();
        if self.gate.is_closed() {
            return None;
        }
        let entry = t.entries.get_mut(id)?;
        if entry.state != EntryState::Pending {
            return None;
        }
        entry.state = EntryState::Active;
        entry.capabilities = capabilities;
        Some(entry.handle.clone())
    }

    /// Add an active entry to the capability index.
    pub(crate) fn publish(&self, id: &str) -> bool {
        let mut t = self.write();
        if self.gate.is_closed() {
            return false;
        }
        let Some((key, entry)) = t.entries.get_key_value(id) else {
            return false;
        };
        if entry.state != EntryState::Active || entry.indexed {
            return false;
        }
        let key = key.clone();
        let capabilities = entry.capabilities.clone();

        for cap in capabilities {
            t.by_capability.entry(cap).or_default().insert(key.clone());
        }
        if let Some(entry) = t.entries.get_mut(id) {
            entry.indexed = true;
        }
        true
    }

    /// Remove an entry (→ CLOSED) and drop it from the index.
    pub(crate) fn remove(&self, id: &str) -> Option<ConnectionHandle> {
        let mut t = self.write();
        if self.gate.is_closed() {
            return None;
        }
        let (key, entry) = t.entries.remove_entry(id)?;
        if entry.indexed {
            t.unindex(&key, &entry.capabilities);
        }
        Some(entry.handle)
    }

    /// Close the gate and purge everything. Returns how many entries were
    /// dropped, or `None` if the table was already closed.
    pub(crate) fn close(&self) -> Option<usize> {
        let mut t = self.write();
        if !self.gate.close() {
            return None;
        }
        let purged = t.entries.len();
        t.entries.clear();
        t.by_capability.clear();
        Some(purged)
    }

    /// Point-in-time copy of every handle, pending or active.
    pub(crate) fn all(&self) -> Vec<ConnectionHandle> {
        self.read().entries.values().map(|e| e.handle.clone()).collect()
    }

    /// Point-in-time copy of the active handles that agreed `capability`.
    pub(crate) fn supporting(&self, capability: &SubProtocolIdentifier) -> Vec<ConnectionHandle> {
        let t = self.read();
        let Some(ids) = t.by_capability.get(capability) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| t.entries.get(id))
            .filter(|e| e.state == EntryState::Active)
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Distinct capabilities currently offered by at least one active entry.
    pub(crate) fn capabilities(&self) -> Vec<SubProtocolIdentifier> {
        let mut caps: Vec<_> = self.read().by_capability.keys().cloned().collect();
        caps.sort();
        caps
    }

    pub(crate) fn active_count(&self) -> usize {
        self.counts().1
    }

    /// (pending, active) entry counts.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let t = self.read();
        let active = t
            .entries
            .values()
            .filter(|e| e.state == EntryState::Active)
            .count();
        (t.entries.len() - active, active)
    }

    pub(crate) fn len(&self) -> usize {
        self.read().entries.len()
    }

    // Listener code never runs under this lock, so a poisoned guard can only
    // come from a panic between two plain map operations; the data is usable.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn index_is_consistent(&self) -> bool {
        let t = self.read();
        t.by_capability.iter().all(|(cap, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    t.entries.get(id).is_some_and(|e| {
                        e.state == EntryState::Active && e.indexed && e.capabilities.contains(cap)
                    })
                })
        })
    }
}
