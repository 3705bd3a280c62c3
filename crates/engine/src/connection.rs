//! Live client connection state used by the storage engine

use mqsession_core::{validate_client_id, Result, StorageAreas};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connected client session.
///
/// Shared as `Arc<Connection>`; holding a clone keeps it alive across
/// asynchronous work such as a scheduled flush.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    client_id: String,
    op_lock: Mutex<()>,
    areas: AtomicU8,
    flushing: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    /// New open connection for `client_id`
    pub fn new(client_id: impl Into<String>) -> Result<Arc<Self>> {
        let client_id = client_id.into();
        validate_client_id(&client_id)?;
        Ok(Arc::new(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client_id,
            op_lock: Mutex::new(()),
            areas: AtomicU8::new(0),
            flushing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    /// Process-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Client identifier
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Storage areas known to exist for this session
    pub fn initialized_areas(&self) -> StorageAreas {
        StorageAreas::from_bits_truncate(self.areas.load(Ordering::Acquire))
    }

    pub(crate) fn mark_initialized(&self, areas: StorageAreas) {
        self.areas.fetch_or(areas.bits(), Ordering::AcqRel);
    }

    /// Serializes area initialization, clearing and flush-state changes
    pub(crate) fn op_lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock()
    }

    /// Whether a flush is running or queued
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub(crate) fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::Release);
    }

    /// Mark the connection as closing; no new flush will be scheduled
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
