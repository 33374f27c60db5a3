//! Registry integration tests.
//!
//! These drive a shared repository from many OS threads and tokio tasks at
//! once, the way per-connection drivers and sub-protocol handlers do in a
//! running node. Set RUST_LOG=peerwire_registry=debug to see transitions.

use std::sync::{Arc, Mutex, Once};

use peerwire_registry::{BasicWireConnection, ConnectionHandle, ConnectionRepository, SubProtocolIdentifier};

mod lifecycle;

// ── Harness ───────────────────────────────────────────────────────────────────

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn cap(s: &str) -> SubProtocolIdentifier {
    s.parse().expect("valid capability")
}

/// Stable identity of a handle, for comparing listener journals.
pub fn addr_of(conn: &ConnectionHandle) -> usize {
    Arc::as_ptr(conn) as *const () as usize
}

pub fn addr_of_basic(conn: &Arc<BasicWireConnection>) -> usize {
    Arc::as_ptr(conn) as *const () as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    Connect(usize),
    Disconnect(usize),
}

/// Record every listener event of a repository, in firing order.
pub fn journal(repo: &dyn ConnectionRepository) -> Arc<Mutex<Vec<Seen>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    repo.add_connection_listener(Arc::new(move |c| {
        sink.lock().unwrap().push(Seen::Connect(addr_of(c)));
    }));
    let sink = log.clone();
    repo.add_disconnection_listener(Arc::new(move |c| {
        sink.lock().unwrap().push(Seen::Disconnect(addr_of(c)));
    }));
    log
}
