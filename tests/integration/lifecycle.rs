use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use peerwire_registry::{
    BasicWireConnection, ConnectionRepository, ConnectionState, MemoryConnectionRepository,
    RegistryError,
};

use crate::*;

#[test]
fn negotiated_connection_round_trip() {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = disconnects.clone();
    repo.add_disconnection_listener(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let h1 = BasicWireConnection::handle("h1");
    let id = repo.add(h1.clone()).unwrap();
    assert_eq!(id.as_str(), "0");

    h1.negotiated(vec![cap("eth/66")]);
    let found: Vec<_> = repo.iter_supporting(&cap("eth/66")).into_iter().collect();
    assert_eq!(found.len(), 1);
    assert_eq!(addr_of(&found[0]), addr_of_basic(&h1));

    h1.close();
    assert!(repo.get("0").is_none());
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn every_listener_fires_once_in_order() {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let first = journal(&repo);
    let second = journal(&repo);

    let h = BasicWireConnection::handle("peer");
    repo.add(h.clone()).unwrap();
    h.negotiated(vec![cap("eth/66"), cap("snap/1")]);
    h.close();
    // Repeated transitions on the handle are no-ops.
    h.close();

    let expected = vec![Seen::Connect(addr_of_basic(&h)), Seen::Disconnect(addr_of_basic(&h))];
    assert_eq!(*first.lock().unwrap(), expected);
    assert_eq!(*second.lock().unwrap(), expected);
}

#[test]
fn short_circuit_close_skips_connect_event() {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let log = journal(&repo);

    let h = BasicWireConnection::handle("peer");
    let id = repo.add(h.clone()).unwrap();
    assert!(repo.get(id.as_str()).is_some());

    h.close();
    assert_eq!(*log.lock().unwrap(), vec![Seen::Disconnect(addr_of_basic(&h))]);
    assert!(repo.get(id.as_str()).is_none());
    assert_eq!(h.state(), ConnectionState::Closed);
}

#[test]
fn pending_connection_is_enumerated_but_not_filtered() {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let active = BasicWireConnection::handle("active");
    let pending = BasicWireConnection::handle("pending");
    repo.add(active.clone()).unwrap();
    repo.add(pending.clone()).unwrap();
    active.negotiated(vec![cap("eth/66"), cap("les/4")]);

    assert_eq!(repo.iter_all().len(), 2);
    for wanted in ["eth/66", "les/4"] {
        let matches = repo.iter_supporting(&cap(wanted));
        assert_eq!(matches.len(), 1, "{wanted}");
        assert_eq!(addr_of(matches.iter().next().unwrap()), addr_of_basic(&active));
    }
    assert!(repo.iter_supporting(&cap("snap/1")).is_empty());
}

#[test]
fn closed_repository_is_a_full_shutdown() {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let log = journal(&repo);
    let a = BasicWireConnection::handle("a");
    let b = BasicWireConnection::handle("b");
    let id_a = repo.add(a.clone()).unwrap();
    repo.add(b.clone()).unwrap();
    a.negotiated(vec![cap("eth/66")]);

    repo.close();

    assert!(repo.get(id_a.as_str()).is_none());
    assert!(repo.iter_all().is_empty());
    assert!(repo.iter_supporting(&cap("eth/66")).is_empty());
    assert!(repo.capabilities().is_empty());
    assert_eq!(repo.add(BasicWireConnection::handle("c")), Err(RegistryError::Closed));

    b.negotiated(vec![cap("eth/66")]);
    a.close();
    b.close();
    assert_eq!(*log.lock().unwrap(), vec![Seen::Connect(addr_of_basic(&a))]);

    let stats = repo.stats();
    assert!(stats.closed);
    assert_eq!(stats.pending + stats.active, 0);
}

#[test]
fn snapshot_is_unaffected_by_later_changes() {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let handles: Vec<_> = (0..4)
        .map(|n| BasicWireConnection::handle(format!("peer-{n}")))
        .collect();
    for h in &handles {
        repo.add(h.clone()).unwrap();
        h.negotiated(vec![cap("eth/66")]);
    }

    let snapshot = repo.iter_supporting(&cap("eth/66"));
    for h in &handles {
        h.close();
        repo.add(BasicWireConnection::handle("late")).unwrap();
    }

    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot.iter().count(), 4);
    assert!(repo.iter_supporting(&cap("eth/66")).is_empty());
}

#[tokio::test]
async fn async_consumer_waits_for_activation() -> anyhow::Result<()> {
    init_tracing();
    let repo = MemoryConnectionRepository::new();
    let h = BasicWireConnection::handle("peer");
    repo.add(h.clone())?;

    let mut state = h.watch_state();
    let driver = h.clone();
    let task = tokio::spawn(async move {
        tokio::task::yield_now().await;
        driver.negotiated(vec![cap("eth/66")]);
    });

    state.wait_for(|s| *s == ConnectionState::Active).await?;
    task.await?;
    assert_eq!(repo.iter_supporting(&cap("eth/66")).len(), 1);
    Ok(())
}
