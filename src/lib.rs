//! mqsession - persistent session state for MQTT brokers and clients
//!
//! Subscriptions, queued messages, retained messages and packet id locks
//! are kept as small record files under one storage root, so a restarted
//! process picks up every session where it left off.
//!
//! # Quick Start
//!
//! ```no_run
//! use mqsession::{Connection, Qos, StorageConfig, StorageContext};
//!
//! let ctx = StorageContext::new(StorageConfig::at("/var/lib/mqsession"))?;
//! ctx.load()?;
//!
//! let conn = Connection::new("sensor-17")?;
//! ctx.recover_session(&conn)?;
//! ctx.subscribe(&conn, "cmd/sensor-17/#", Qos::AtLeastOnce)?;
//! ctx.store_message(&conn, 1, Qos::AtLeastOnce, b"reading")?;
//! # Ok::<(), mqsession::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `mqsession-core`: errors, configuration, QoS and topic matching
//! - `mqsession-storage`: the on-disk stores
//! - `mqsession-engine`: [`StorageContext`], connections, the subscription
//!   index and asynchronous flush

pub use mqsession_core::{
    is_valid_filter, is_valid_topic_name, is_wildcard, topic_matches, validate_client_id, Error,
    PacketId, Qos, Result, StorageAreas, StorageConfig,
};
pub use mqsession_engine::{
    Connection, FlushOutcome, FlushScheduler, IndexCounts, Presence, SubmitError, Subscriber,
    SubscriptionIndex, Task, TaskExecutor, TaskPool, StorageContext,
};
pub use mqsession_storage::{
    FlushStats, MessageHandle, NoHooks, QueuedMessage, Redelivery, ReleaseEvent, RetainedMessage,
    Storage, StorageHooks, StorageLayout, StoreEvent, SubscriptionRecord,
};

/// Lower-level building blocks
pub mod storage {
    pub use mqsession_storage::*;
}
