//! End-to-end session lifecycle through the public API
//!
//! Connect, subscribe, queue while offline, restart, reconnect, flush,
//! retained delivery for a new subscriber, and session teardown.

use mqsession::{
    Connection, FlushOutcome, Presence, Qos, QueuedMessage, Result, StorageAreas, StorageConfig,
    StorageContext, TaskPool,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn context(root: &TempDir, pool: &Arc<TaskPool>) -> StorageContext {
    StorageContext::new(StorageConfig::at(root.path().join("mq")).with_shard_count(128))
        .unwrap()
        .with_executor(pool.clone())
}

#[test]
fn dev1_queue_and_flush() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let pool = Arc::new(TaskPool::new(2, 16).unwrap());
    let ctx = context(&root, &pool);

    let conn = Connection::new("dev1").unwrap();
    ctx.init(&conn, StorageAreas::ALL).unwrap();
    for (pid, size) in [(1u64, 10usize), (2, 20), (3, 30)] {
        ctx.store_message(&conn, pid, Qos::AtLeastOnce, &vec![b'm'; size])
            .unwrap();
    }
    assert_eq!(ctx.queued_messages(&conn).unwrap(), 3);
    assert_eq!(ctx.queued_quota(&conn).unwrap(), 60);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let storage = ctx.storage();
    let outcome = ctx
        .queued_flush(
            &conn,
            Arc::new(move |msg: QueuedMessage| -> Result<()> {
                sink.lock().push((msg.packet_id, msg.payload.len()));
                storage.messages().release(msg.handle)?;
                Ok(())
            }),
        )
        .unwrap();
    assert_eq!(outcome, FlushOutcome::Scheduled);
    pool.drain();

    assert_eq!(*delivered.lock(), vec![(1, 10), (2, 20), (3, 30)]);
    let msgs = root.path().join("mq/dev1/msgs");
    assert_eq!(std::fs::read_dir(msgs).unwrap().count(), 0);
}

#[test]
fn offline_client_reconnects_after_restart() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let pool = Arc::new(TaskPool::new(1, 16).unwrap());

    {
        let ctx = context(&root, &pool);
        ctx.load().unwrap();
        let conn = Connection::new("phone").unwrap();
        ctx.recover_session(&conn).unwrap();
        ctx.subscribe(&conn, "chat/+/msg", Qos::AtLeastOnce).unwrap();
        ctx.disconnect(&conn);

        // Broker queues traffic for the disconnected subscriber.
        for sub in ctx.subscribers("chat/room1/msg") {
            assert_eq!(sub.presence, Presence::Offline);
            ctx.store_offline(&sub.client_id, 70_000, sub.qos, b"hello")
                .unwrap();
        }
    }

    let ctx = context(&root, &pool);
    assert_eq!(ctx.load().unwrap(), 1);
    let conn = Connection::new("phone").unwrap();
    assert_eq!(ctx.recover_session(&conn).unwrap(), 1);
    assert_eq!(ctx.subscribers("chat/room1/msg")[0].presence, Presence::Online);

    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&got);
    let storage = ctx.storage();
    ctx.queued_flush(
        &conn,
        Arc::new(move |msg: QueuedMessage| -> Result<()> {
            sink.lock().push((msg.packet_id, msg.payload.clone()));
            storage.messages().release(msg.handle)?;
            Ok(())
        }),
    )
    .unwrap();
    pool.drain();
    assert_eq!(*got.lock(), vec![(70_000, b"hello".to_vec())]);
}

#[test]
fn new_subscriber_receives_retained_once() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let pool = Arc::new(TaskPool::new(1, 4).unwrap());
    let ctx = context(&root, &pool);

    ctx.set_retained("$SYS/uptime", Qos::AtMostOnce, b"10s").unwrap();
    ctx.set_retained("lights/hall", Qos::AtLeastOnce, b"off").unwrap();
    ctx.set_retained("lights/hall", Qos::AtLeastOnce, b"on").unwrap();
    ctx.set_retained("lights/porch", Qos::AtMostOnce, b"off").unwrap();

    let conn = Connection::new("panel").unwrap();
    ctx.subscribe(&conn, "#", Qos::AtLeastOnce).unwrap();
    let pushed = ctx.retained_for_subscription("#").unwrap();
    let topics: Vec<_> = pushed.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(topics, vec!["lights/hall", "lights/porch"]);
    assert_eq!(pushed[0].payload, b"on");

    assert!(ctx.retained_for_subscription("lights/#").unwrap().is_empty());
    assert_eq!(ctx.retained_topics("$SYS/#").unwrap(), vec!["$SYS/uptime"]);
}

#[test]
fn clean_session_clears_everything() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let pool = Arc::new(TaskPool::new(1, 4).unwrap());
    let ctx = context(&root, &pool);

    let conn = Connection::new("ephemeral").unwrap();
    ctx.subscribe(&conn, "a", Qos::AtMostOnce).unwrap();
    ctx.subscribe(&conn, "b/#", Qos::AtMostOnce).unwrap();
    ctx.store_message(&conn, 1, Qos::AtLeastOnce, b"x").unwrap();
    ctx.lock_pkgid(&conn, 1).unwrap();

    assert_eq!(ctx.clear(&conn, StorageAreas::ALL).unwrap(), 4);
    assert_eq!(ctx.subscription_count(&conn).unwrap(), 0);
    assert_eq!(ctx.queued_messages(&conn).unwrap(), 0);
    assert!(ctx.subscribers("a").is_empty());
    assert!(ctx.lock_pkgid(&conn, 1).unwrap());
}

#[test]
fn config_file_drives_context() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("mqsession.toml");
    StorageConfig::at(root.path().join("data"))
        .with_shard_count(8)
        .with_max_message_size(4)
        .write_to_file(&path)
        .unwrap();

    let ctx = StorageContext::new(StorageConfig::from_file(&path).unwrap()).unwrap();
    let conn = Connection::new("c").unwrap();
    assert!(ctx.store_message(&conn, 1, Qos::AtMostOnce, b"1234").is_ok());
    assert!(matches!(
        ctx.store_message(&conn, 2, Qos::AtMostOnce, b"12345"),
        Err(mqsession::Error::PayloadTooLarge { size: 5, max: 4 })
    ));
}
