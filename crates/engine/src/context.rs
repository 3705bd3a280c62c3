//! Storage context: the engine-level entry point
//!
//! Owns the configuration, the [`Storage`] handle built from it, the
//! in-memory subscription index and the flush scheduler. Operations come in
//! two forms:
//!
//! - connection-bound (`subscribe`, `store_message`, ...) take a
//!   [`Connection`] and use its area bitmask and lock
//! - offline (`subscribe_offline`, `store_offline`, ...) take a bare client
//!   identifier
//!
//! ## Locking
//!
//! The context lock serializes root creation, the one-time index load and
//! path changes. Each connection's lock serializes its area initialization,
//! clearing and flush flag. A connection lock may be held while taking the
//! context lock, never the other way round.

use mqsession_core::{Error, PacketId, Qos, Result, StorageAreas, StorageConfig};
use mqsession_storage::{
    FlushStats, MessageHandle, Redelivery, RetainedMessage, Storage, StorageHooks, StorageLayout,
};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::background::{TaskExecutor, TaskPool};
use crate::connection::Connection;
use crate::flush::{FlushOutcome, FlushScheduler};
use crate::index::{Presence, Subscriber, SubscriptionIndex};
use crate::recovery;

/// Workers in the default flush pool
pub const DEFAULT_FLUSH_WORKERS: usize = 2;
/// Queue bound of the default flush pool
pub const DEFAULT_FLUSH_QUEUE: usize = 1024;

/// Session storage engine
pub struct StorageContext {
    config: RwLock<StorageConfig>,
    storage: RwLock<Arc<Storage>>,
    lock: Mutex<()>,
    base_ready: AtomicBool,
    loaded: AtomicBool,
    index: OnceCell<SubscriptionIndex>,
    flush: OnceCell<FlushScheduler>,
}

impl StorageContext {
    /// Context over a validated configuration.
    ///
    /// Nothing touches the disk until the first operation.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let storage = Storage::open(&config)?;
        Ok(StorageContext {
            config: RwLock::new(config),
            storage: RwLock::new(Arc::new(storage)),
            lock: Mutex::new(()),
            base_ready: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            index: OnceCell::new(),
            flush: OnceCell::new(),
        })
    }

    /// Install store/release hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn StorageHooks>) -> Self {
        let storage = self.storage.get_mut();
        *storage = Arc::new((**storage).clone().with_hooks(hooks));
        self
    }

    /// Run flushes on `executor` instead of the built-in pool
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.flush = OnceCell::with_value(FlushScheduler::new(executor));
        self
    }

    /// Current storage handle.
    ///
    /// A snapshot: a later [`set_path`](Self::set_path) does not affect it.
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.read().clone()
    }

    /// Current configuration
    pub fn config(&self) -> StorageConfig {
        self.config.read().clone()
    }

    /// Storage root in use
    pub fn root(&self) -> PathBuf {
        self.storage().layout().root().to_path_buf()
    }

    /// Move storage to another root and shard count.
    ///
    /// Existing files are not migrated. Hooks and shard locks carry over.
    pub fn set_path(&self, root: impl AsRef<Path>, shard_count: u32) -> Result<()> {
        let _lock = self.lock.lock();
        let config = self
            .config
            .read()
            .clone()
            .with_root(root.as_ref())
            .with_shard_count(shard_count);
        config.validate()?;

        let relocated = self
            .storage
            .read()
            .relocated(StorageLayout::from_config(&config));
        *self.storage.write() = Arc::new(relocated);
        *self.config.write() = config;
        self.base_ready.store(false, Ordering::Release);

        info!(
            target: "mqsession::session",
            root = %root.as_ref().display(),
            shard_count,
            "Storage path changed"
        );
        Ok(())
    }

    /// Create the storage root and retained directory once.
    pub fn ensure_base_storage(&self) -> Result<()> {
        if self.base_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let _lock = self.lock.lock();
        self.ensure_base_locked()
    }

    fn ensure_base_locked(&self) -> Result<()> {
        if self.base_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.storage().sessions().ensure_base_storage()?;
        self.base_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// In-memory subscription index
    pub fn index(&self) -> &SubscriptionIndex {
        self.index.get_or_init(SubscriptionIndex::new)
    }

    /// Rebuild the subscription index from disk.
    ///
    /// Runs once per context; later calls return `Ok(0)`. A failed load may
    /// be retried.
    pub fn load(&self) -> Result<usize> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(0);
        }
        let _lock = self.lock.lock();
        if self.loaded.load(Ordering::Acquire) {
            return Ok(0);
        }
        self.ensure_base_locked()?;
        let recovered = recovery::load_all(&self.storage(), self.index())?;
        self.loaded.store(true, Ordering::Release);
        Ok(recovered)
    }

    /// Whether [`load`](Self::load) has completed
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Index entries whose filter selects `topic_name`
    pub fn subscribers(&self, topic_name: &str) -> Vec<Subscriber> {
        self.index().subscribers(topic_name)
    }

    fn flush_scheduler(&self) -> Result<&FlushScheduler> {
        self.flush.get_or_try_init(|| -> Result<FlushScheduler> {
            let pool = TaskPool::new(DEFAULT_FLUSH_WORKERS, DEFAULT_FLUSH_QUEUE)
                .map_err(|e| Error::storage("starting flush workers", e))?;
            Ok(FlushScheduler::new(Arc::new(pool)))
        })
    }

    // ----- connection-bound -----

    /// Make sure the requested areas exist for the connection's session.
    ///
    /// Areas already recorded on the connection are skipped without I/O.
    /// Returns the areas created on disk by this call.
    pub fn init(&self, conn: &Connection, areas: StorageAreas) -> Result<StorageAreas> {
        if conn.initialized_areas().contains(areas) {
            return Ok(StorageAreas::empty());
        }
        let _lock = conn.op_lock();
        let missing = areas.difference(conn.initialized_areas());
        if missing.is_empty() {
            return Ok(StorageAreas::empty());
        }
        self.ensure_base_storage()?;
        let created = self
            .storage()
            .sessions()
            .init_session(conn.client_id(), missing)?;
        conn.mark_initialized(missing);
        Ok(created)
    }

    /// Empty the requested areas of the connection's session.
    ///
    /// Clearing `SUBS` also drops the client from the index.
    pub fn clear(&self, conn: &Connection, areas: StorageAreas) -> Result<u64> {
        let _lock = conn.op_lock();
        self.clear_areas(conn.client_id(), areas)
    }

    fn clear_areas(&self, client_id: &str, areas: StorageAreas) -> Result<u64> {
        let removed = self.storage().sessions().clear_session(client_id, areas)?;
        if areas.contains(StorageAreas::SUBS) {
            self.index().remove_client(client_id);
        }
        Ok(removed)
    }

    /// Persist a subscription and index it as online.
    ///
    /// `Ok(false)` when the filter was already stored; its QoS is kept.
    pub fn subscribe(&self, conn: &Connection, topic_filter: &str, qos: Qos) -> Result<bool> {
        self.init(conn, StorageAreas::SUBS)?;
        self.subscribe_as(conn.client_id(), topic_filter, qos, Presence::Online)
    }

    fn subscribe_as(
        &self,
        client_id: &str,
        topic_filter: &str,
        qos: Qos,
        presence: Presence,
    ) -> Result<bool> {
        let stored = self
            .storage()
            .subscriptions()
            .subscribe(client_id, topic_filter, qos)?;
        // an already stored filter may sit in the other presence map
        let index = self.index();
        if stored || !index.contains(client_id, topic_filter, presence) {
            index.register(client_id, topic_filter, qos, presence);
        }
        Ok(stored)
    }

    /// Remove a subscription from disk and index.
    pub fn unsubscribe(&self, conn: &Connection, topic_filter: &str) -> Result<bool> {
        self.unsubscribe_offline(conn.client_id(), topic_filter)
    }

    /// Whether the connection's session stores `topic_filter`
    pub fn subscription_exists(&self, conn: &Connection, topic_filter: &str) -> Result<bool> {
        self.storage()
            .subscriptions()
            .exists(conn.client_id(), topic_filter, false)
    }

    /// Stored subscriptions of the connection's session
    pub fn subscription_count(&self, conn: &Connection) -> Result<usize> {
        self.storage().subscriptions().count(conn.client_id())
    }

    /// Queue a message for the connection's session.
    ///
    /// The store hook sees the connection id and runs once.
    pub fn store_message(
        &self,
        conn: &Connection,
        packet_id: PacketId,
        qos: Qos,
        payload: &[u8],
    ) -> Result<MessageHandle> {
        self.init(conn, StorageAreas::MSGS)?;
        self.storage()
            .messages()
            .store_on_connection(conn.id(), conn.client_id(), packet_id, qos, payload)
    }

    /// Payload of a queued message, `None` once released
    pub fn read_message(&self, handle: &MessageHandle) -> Result<Option<Vec<u8>>> {
        self.storage().messages().read(handle)
    }

    /// Delete a queued message.
    pub fn release_message(&self, handle: MessageHandle) -> Result<bool> {
        self.storage().messages().release(handle)
    }

    /// Number of queued messages
    pub fn queued_messages(&self, conn: &Connection) -> Result<usize> {
        self.storage().messages().count(conn.client_id())
    }

    /// Declared payload bytes of all queued messages
    pub fn queued_quota(&self, conn: &Connection) -> Result<u64> {
        self.storage().messages().quota(conn.client_id())
    }

    /// Flush queued messages on the caller's thread.
    pub fn flush_now(&self, conn: &Connection, redelivery: &dyn Redelivery) -> Result<FlushStats> {
        self.storage().messages().flush(conn.client_id(), redelivery)
    }

    /// Flush queued messages on the flush executor, at most one at a time
    /// per connection.
    pub fn queued_flush(
        &self,
        conn: &Arc<Connection>,
        redelivery: Arc<dyn Redelivery>,
    ) -> Result<FlushOutcome> {
        let scheduler = self.flush_scheduler()?;
        Ok(scheduler.schedule(self.storage(), conn, redelivery))
    }

    /// Reserve a packet id for the connection's session.
    pub fn lock_pkgid(&self, conn: &Connection, packet_id: PacketId) -> Result<bool> {
        self.init(conn, StorageAreas::PKGIDS)?;
        self.storage().pkgids().acquire(conn.client_id(), packet_id)
    }

    /// Release a packet id reservation.
    pub fn release_pkgid(&self, conn: &Connection, packet_id: PacketId) -> Result<bool> {
        self.storage().pkgids().release(conn.client_id(), packet_id)
    }

    /// Will area of the connection's session, created if missing
    pub fn will_dir(&self, conn: &Connection) -> Result<PathBuf> {
        self.init(conn, StorageAreas::WILL)?;
        self.storage().sessions().will_dir(conn.client_id())
    }

    /// Bring the connection's stored subscriptions online in the index.
    pub fn recover_session(&self, conn: &Connection) -> Result<usize> {
        recovery::recover_session(&self.storage(), self.index(), conn)
    }

    /// Close the connection and move its subscriptions offline.
    ///
    /// Returns how many index entries moved.
    pub fn disconnect(&self, conn: &Connection) -> usize {
        conn.close();
        let moved = self.index().move_online_to_offline(conn.client_id());
        debug!(
            target: "mqsession::session",
            client_id = conn.client_id(),
            connection_id = conn.id(),
            moved,
            "Connection closed"
        );
        moved
    }

    // ----- offline -----

    /// Create session areas for a client that is not connected
    pub fn init_offline(&self, client_id: &str, areas: StorageAreas) -> Result<StorageAreas> {
        self.ensure_base_storage()?;
        self.storage().sessions().init_session(client_id, areas)
    }

    /// Empty session areas for a client that is not connected
    pub fn clear_offline(&self, client_id: &str, areas: StorageAreas) -> Result<u64> {
        self.clear_areas(client_id, areas)
    }

    /// Persist a subscription for a client that is not connected.
    pub fn subscribe_offline(&self, client_id: &str, topic_filter: &str, qos: Qos) -> Result<bool> {
        self.ensure_base_storage()?;
        self.subscribe_as(client_id, topic_filter, qos, Presence::Offline)
    }

    /// Remove a subscription by client identifier.
    pub fn unsubscribe_offline(&self, client_id: &str, topic_filter: &str) -> Result<bool> {
        let removed = self
            .storage()
            .subscriptions()
            .unsubscribe(client_id, topic_filter)?;
        self.index().unregister(client_id, topic_filter);
        Ok(removed)
    }

    /// Queue a message for a client that is not connected.
    pub fn store_offline(
        &self,
        client_id: &str,
        packet_id: PacketId,
        qos: Qos,
        payload: &[u8],
    ) -> Result<MessageHandle> {
        self.ensure_base_storage()?;
        self.storage()
            .messages()
            .store(client_id, packet_id, qos, payload)
    }

    /// Reserve a packet id by client identifier
    pub fn lock_pkgid_offline(&self, client_id: &str, packet_id: PacketId) -> Result<bool> {
        self.ensure_base_storage()?;
        self.storage().pkgids().acquire(client_id, packet_id)
    }

    /// Release a packet id by client identifier
    pub fn release_pkgid_offline(&self, client_id: &str, packet_id: PacketId) -> Result<bool> {
        self.storage().pkgids().release(client_id, packet_id)
    }

    // ----- retained -----

    /// Replace the retained message for `topic`.
    pub fn set_retained(&self, topic: &str, qos: Qos, payload: &[u8]) -> Result<()> {
        self.ensure_base_storage()?;
        self.storage().retained().set(topic, qos, payload)
    }

    /// Delete the retained message for `topic`
    pub fn release_retained(&self, topic: &str) -> Result<bool> {
        self.storage().retained().release(topic)
    }

    /// Take the retained message for `topic` (consumes it)
    pub fn recover_retained(&self, topic: &str) -> Result<Option<RetainedMessage>> {
        self.storage().retained().recover(topic)
    }

    /// Retained topic names selected by `topic_filter`
    pub fn retained_topics(&self, topic_filter: &str) -> Result<Vec<String>> {
        self.storage().retained().list_matching(topic_filter)
    }

    /// Retained messages to push to a new subscriber of `topic_filter`.
    ///
    /// Each message is consumed as it is returned. Topics that vanish
    /// between listing and recovery are skipped.
    pub fn retained_for_subscription(&self, topic_filter: &str) -> Result<Vec<RetainedMessage>> {
        let storage = self.storage();
        let retained = storage.retained();
        let mut messages = Vec::new();
        for topic in retained.list_matching(topic_filter)? {
            if let Some(message) = retained.recover(&topic)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("config", &*self.config.read())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{SubmitError, Task};
    use mqsession_storage::{NoHooks, QueuedMessage, StoreEvent};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> StorageContext {
        StorageContext::new(StorageConfig::at(dir.path().join("root")).with_shard_count(16))
            .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = StorageConfig::default().with_max_message_size(0);
        assert!(StorageContext::new(config).is_err());
    }

    #[test]
    fn test_nothing_created_until_used() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(!dir.path().join("root").exists());
        ctx.ensure_base_storage().unwrap();
        assert!(dir.path().join("root/retained").is_dir());
    }

    #[test]
    fn test_init_uses_connection_bitmask() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let conn = Connection::new("dev1").unwrap();

        let created = ctx.init(&conn, StorageAreas::MSGS | StorageAreas::SUBS).unwrap();
        assert_eq!(created, StorageAreas::MSGS | StorageAreas::SUBS);
        assert_eq!(
            ctx.init(&conn, StorageAreas::MSGS).unwrap(),
            StorageAreas::empty()
        );

        std::fs::remove_dir(dir.path().join("root/dev1/msgs")).unwrap();
        // Bitmask says MSGS exists, so no I/O happens.
        assert_eq!(
            ctx.init(&conn, StorageAreas::MSGS).unwrap(),
            StorageAreas::empty()
        );
        assert_eq!(
            ctx.init(&conn, StorageAreas::ALL).unwrap(),
            StorageAreas::WILL | StorageAreas::PKGIDS
        );
    }

    #[test]
    fn test_concurrent_init_creates_once() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let conn = Connection::new("dev1").unwrap();
        let barrier = Barrier::new(2);
        let creations = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    barrier.wait();
                    let created = ctx.init(&conn, StorageAreas::ALL).unwrap();
                    if !created.is_empty() {
                        creations.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(creations.load(Ordering::Relaxed), 1);
        assert_eq!(conn.initialized_areas(), StorageAreas::ALL);
    }

    #[test]
    fn test_subscribe_keeps_index_in_step() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let conn = Connection::new("dev1").unwrap();

        assert!(ctx.subscribe(&conn, "a/+", Qos::AtLeastOnce).unwrap());
        assert!(!ctx.subscribe(&conn, "a/+", Qos::ExactlyOnce).unwrap());
        assert!(ctx.subscription_exists(&conn, "a/+").unwrap());
        assert_eq!(ctx.subscription_count(&conn).unwrap(), 1);

        let subs = ctx.subscribers("a/b");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].qos, Qos::AtLeastOnce);
        assert_eq!(subs[0].presence, Presence::Online);

        assert!(ctx.unsubscribe(&conn, "a/+").unwrap());
        assert!(ctx.subscribers("a/b").is_empty());
        assert!(!ctx.unsubscribe(&conn, "a/+").unwrap());
    }

    #[test]
    fn test_clear_subs_drops_index_entries() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let conn = Connection::new("dev1").unwrap();
        ctx.subscribe(&conn, "x", Qos::AtMostOnce).unwrap();
        ctx.subscribe(&conn, "y/#", Qos::AtMostOnce).unwrap();

        assert_eq!(ctx.clear(&conn, StorageAreas::SUBS).unwrap(), 2);
        assert_eq!(ctx.subscription_count(&conn).unwrap(), 0);
        assert!(ctx.subscribers("x").is_empty());
        assert!(ctx.subscribers("y/z").is_empty());
    }

    #[test]
    fn test_load_runs_once() {
        let dir = TempDir::new().unwrap();
        {
            let ctx = context(&dir);
            ctx.subscribe_offline("a", "t/1", Qos::AtMostOnce).unwrap();
            ctx.subscribe_offline("b", "t/+", Qos::AtMostOnce).unwrap();
        }

        let ctx = context(&dir);
        assert!(!ctx.is_loaded());
        assert_eq!(ctx.load().unwrap(), 2);
        assert!(ctx.is_loaded());
        assert_eq!(ctx.load().unwrap(), 0);
        assert_eq!(ctx.subscribers("t/1").len(), 2);
    }

    #[test]
    fn test_recover_then_disconnect() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.subscribe_offline("dev1", "s/#", Qos::AtLeastOnce).unwrap();
        assert_eq!(ctx.subscribers("s/1")[0].presence, Presence::Offline);

        let conn = Connection::new("dev1").unwrap();
        assert_eq!(ctx.recover_session(&conn).unwrap(), 1);
        assert_eq!(ctx.subscribers("s/1")[0].presence, Presence::Online);

        assert_eq!(ctx.disconnect(&conn), 1);
        assert!(conn.is_closed());
        assert_eq!(ctx.subscribers("s/1")[0].presence, Presence::Offline);
    }

    #[test]
    fn test_set_path_relocates() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.set_retained("a", Qos::AtMostOnce, b"old root").unwrap();

        let other = dir.path().join("other");
        ctx.set_path(&other, 4).unwrap();
        assert_eq!(ctx.root(), other);
        assert_eq!(ctx.config().shard_count, 4);
        assert!(ctx.recover_retained("a").unwrap().is_none());

        ctx.set_retained("a", Qos::AtMostOnce, b"new root").unwrap();
        assert!(other.join("retained").is_dir());
        assert!(ctx.set_path("", 4).is_err());
    }

    #[test]
    fn test_pkgid_locks() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let conn = Connection::new("dev1").unwrap();
        assert!(ctx.lock_pkgid(&conn, 7).unwrap());
        assert!(!ctx.lock_pkgid(&conn, 7).unwrap());
        assert!(!ctx.lock_pkgid_offline("dev1", 7).unwrap());
        assert!(ctx.release_pkgid(&conn, 7).unwrap());
        assert!(ctx.lock_pkgid_offline("dev1", 7).unwrap());
        assert!(ctx.release_pkgid_offline("dev1", 7).unwrap());
        assert!(ctx.lock_pkgid(&conn, 0).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_will_dir_is_created() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let conn = Connection::new("dev1").unwrap();
        let will = ctx.will_dir(&conn).unwrap();
        assert!(will.is_dir());
        assert!(will.ends_with("dev1/will"));
    }

    #[test]
    fn test_store_hook_sees_connection_once() {
        struct Counting(AtomicUsize, Mutex<Option<u64>>);

        impl StorageHooks for Counting {
            fn on_store(&self, event: &StoreEvent<'_>) -> bool {
                self.0.fetch_add(1, Ordering::Relaxed);
                *self.1.lock() = event.connection_id;
                true
            }
        }

        let dir = TempDir::new().unwrap();
        let hooks = Arc::new(Counting(AtomicUsize::new(0), Mutex::new(None)));
        let ctx = context(&dir).with_hooks(hooks.clone());
        let conn = Connection::new("dev1").unwrap();

        let handle = ctx.store_message(&conn, 1, Qos::AtLeastOnce, b"x").unwrap();
        assert_eq!(hooks.0.load(Ordering::Relaxed), 1);
        assert_eq!(*hooks.1.lock(), Some(conn.id()));
        assert_eq!(ctx.read_message(&handle).unwrap().unwrap(), b"x");

        ctx.store_offline("dev1", 2, Qos::AtLeastOnce, b"y").unwrap();
        assert_eq!(hooks.0.load(Ordering::Relaxed), 2);
        assert_eq!(*hooks.1.lock(), None);
    }

    #[test]
    fn test_queued_flush_on_custom_executor() {
        struct Inline;
        impl TaskExecutor for Inline {
            fn execute(&self, task: Task) -> std::result::Result<(), SubmitError> {
                task();
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context(&dir).with_executor(Arc::new(Inline)));
        let conn = Connection::new("dev1").unwrap();
        for (pid, size) in [(1u64, 10usize), (2, 20), (3, 30)] {
            ctx.store_message(&conn, pid, Qos::AtLeastOnce, &vec![7u8; size])
                .unwrap();
        }
        assert_eq!(ctx.queued_messages(&conn).unwrap(), 3);
        assert_eq!(ctx.queued_quota(&conn).unwrap(), 60);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let storage = ctx.storage();
        let redelivery = Arc::new(move |msg: QueuedMessage| -> Result<()> {
            sink.lock().push((msg.packet_id, msg.payload.len()));
            storage.messages().release(msg.handle)?;
            Ok(())
        });

        assert_eq!(
            ctx.queued_flush(&conn, redelivery).unwrap(),
            FlushOutcome::Scheduled
        );
        let mut got = delivered.lock().clone();
        got.sort_unstable();
        assert_eq!(got, vec![(1, 10), (2, 20), (3, 30)]);
        assert_eq!(ctx.queued_messages(&conn).unwrap(), 0);
        assert!(!conn.is_flushing());
    }

    #[test]
    fn test_retained_for_subscription_consumes() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.set_retained("home/a", Qos::AtMostOnce, b"1").unwrap();
        ctx.set_retained("home/b", Qos::AtLeastOnce, b"2").unwrap();
        ctx.set_retained("work/c", Qos::AtMostOnce, b"3").unwrap();

        assert_eq!(
            ctx.retained_topics("home/+").unwrap(),
            vec!["home/a".to_string(), "home/b".to_string()]
        );
        let pushed = ctx.retained_for_subscription("home/#").unwrap();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[1].payload, b"2");
        assert!(ctx.retained_topics("home/#").unwrap().is_empty());
        assert!(ctx.release_retained("work/c").unwrap());
    }

    #[test]
    fn test_noop_hooks_install() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_hooks(Arc::new(NoHooks));
        let conn = Connection::new("dev1").unwrap();
        let handle = ctx.store_message(&conn, 9, Qos::AtMostOnce, b"").unwrap();
        assert!(ctx.release_message(handle).unwrap());
    }

    #[test]
    fn test_reconnect_after_restart_moves_subscription_online() {
        let dir = TempDir::new().unwrap();
        context(&dir)
            .subscribe_offline("dev1", "a/b", Qos::AtLeastOnce)
            .unwrap();

        let ctx = context(&dir);
        ctx.load().unwrap();
        assert_eq!(ctx.subscribers("a/b")[0].presence, Presence::Offline);

        let conn = Connection::new("dev1").unwrap();
        assert!(!ctx.subscribe(&conn, "a/b", Qos::AtLeastOnce).unwrap());
        let subs = ctx.subscribers("a/b");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].presence, Presence::Online);
        assert!(!ctx.index().contains("dev1", "a/b", Presence::Offline));

        // and back again without a duplicate record
        assert!(!ctx.subscribe_offline("dev1", "a/b", Qos::AtLeastOnce).unwrap());
        assert_eq!(ctx.subscribers("a/b")[0].presence, Presence::Offline);
        assert_eq!(ctx.subscription_count(&conn).unwrap(), 1);
    }
}
