//! peerwire-registry — the connection registry for handshake-negotiated peer links.
//!
//! Every sub-protocol handler needs the same answer to "which peers are
//! reachable right now, and with which capabilities". The registry tracks
//! each link from registration (pending) through capability negotiation
//! (active) to closure (removed), indexes active links by capability, and
//! notifies listeners of connections and disconnections.
//!
//! The transport, wire codec and dialing policy live elsewhere; the registry
//! only sees a [`WireConnection`] handle.

mod connection;
mod error;
mod gate;
mod id;
mod inbox;
mod listeners;
mod repository;
mod table;

pub use connection::{
    BasicWireConnection, ConnectionEvent, ConnectionHandle, ConnectionState, TransitionObserver,
    WireConnection,
};
pub use error::RegistryError;
pub use id::ConnectionId;
pub use listeners::Listener;
pub use repository::{ConnectionRepository, MemoryConnectionRepository, RegistryStats, Snapshot};

pub use peerwire_core::{IdScheme, RepositoryConfig, SubProtocolIdentifier};
