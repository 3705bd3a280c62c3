//! Multi-threaded session engine tests
//!
//! Races between connections and threads sharing one StorageContext.

use mqsession_core::{Qos, Result, StorageAreas, StorageConfig};
use mqsession_engine::{Connection, FlushOutcome, StorageContext, TaskPool};
use mqsession_storage::QueuedMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn create_context(temp_dir: &TempDir) -> Arc<StorageContext> {
    let config = StorageConfig::at(temp_dir.path().join("store")).with_shard_count(32);
    Arc::new(StorageContext::new(config).unwrap())
}

// ============================================================================
// Initialization races
// ============================================================================

/// Two threads initializing the same connection: exactly one creates
#[test]
fn test_same_connection_init_race() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = create_context(&temp_dir);
    let conn = Connection::new("dev1").unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let creators = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let conn = Arc::clone(&conn);
            let barrier = Arc::clone(&barrier);
            let creators = Arc::clone(&creators);
            thread::spawn(move || {
                barrier.wait();
                let created = ctx.init(&conn, StorageAreas::ALL)?;
                if !created.is_empty() {
                    creators.fetch_add(1, Ordering::Relaxed);
                }
                Ok::<_, mqsession_core::Error>(())
            })
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap().is_ok());
    }
    assert_eq!(creators.load(Ordering::Relaxed), 1);
    for area in ["msgs", "subs", "will", "pkgids"] {
        assert!(temp_dir.path().join("store/dev1").join(area).is_dir());
    }
}

/// Many connections for different clients create the root concurrently
#[test]
fn test_many_clients_create_root_concurrently() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = create_context(&temp_dir);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = Connection::new(format!("client-{}", i)).unwrap();
                barrier.wait();
                ctx.subscribe(&conn, &format!("t/{}", i), Qos::AtLeastOnce)
            })
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap().unwrap());
    }
    let sessions = ctx.storage().sessions().list_sessions().unwrap();
    assert_eq!(sessions.len(), 8);
    assert_eq!(ctx.subscribers("t/3").len(), 1);
}

// ============================================================================
// Packet id locks
// ============================================================================

/// Only one connection of a client wins a packet id
#[test]
fn test_pkgid_single_winner_across_connections() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = create_context(&temp_dir);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = Connection::new("dev1").unwrap();
                barrier.wait();
                ctx.lock_pkgid(&conn, 42).unwrap()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

// ============================================================================
// Flush
// ============================================================================

/// Concurrent flush requests for one connection deliver each message once
#[test]
fn test_concurrent_flush_requests_deliver_once() {
    let temp_dir = TempDir::new().unwrap();
    let pool = Arc::new(TaskPool::new(4, 64).unwrap());
    let config = StorageConfig::at(temp_dir.path().join("store"));
    let ctx = Arc::new(
        StorageContext::new(config)
            .unwrap()
            .with_executor(pool.clone()),
    );
    let conn = Connection::new("dev1").unwrap();
    for pid in 1..=20u64 {
        ctx.store_message(&conn, pid, Qos::AtLeastOnce, &pid.to_le_bytes())
            .unwrap();
    }

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let storage = ctx.storage();
    let sink = Arc::clone(&delivered);
    let redelivery = Arc::new(move |msg: QueuedMessage| -> Result<()> {
        sink.lock().push(msg.packet_id);
        storage.messages().release(msg.handle)?;
        Ok(())
    });

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let conn = Arc::clone(&conn);
            let barrier = Arc::clone(&barrier);
            let redelivery = redelivery.clone();
            thread::spawn(move || {
                barrier.wait();
                ctx.queued_flush(&conn, redelivery).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    pool.drain();

    assert!(outcomes.contains(&FlushOutcome::Scheduled));
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, FlushOutcome::Scheduled | FlushOutcome::AlreadyFlushing)));

    // A flush that started after another finished sees an empty queue.
    let mut ids = delivered.lock().clone();
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    assert_eq!(ctx.queued_messages(&conn).unwrap(), 0);
    assert!(!conn.is_flushing());
}

/// Subscribing from many threads to the same filter stores one record
#[test]
fn test_concurrent_subscribe_same_filter() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = create_context(&temp_dir);
    let conn = Connection::new("dev1").unwrap();
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let conn = Arc::clone(&conn);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.subscribe(&conn, "sensors/+/temp", Qos::AtLeastOnce)
                    .unwrap()
            })
        })
        .collect();

    let stored = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|s| *s)
        .count();
    assert_eq!(stored, 1);
    assert_eq!(ctx.subscription_count(&conn).unwrap(), 1);
    assert_eq!(ctx.subscribers("sensors/k/temp").len(), 1);
}
