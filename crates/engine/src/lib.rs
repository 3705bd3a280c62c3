//! Session engine for mqsession
//!
//! This crate ties the filesystem stores to live connections:
//! - StorageContext: configuration, acquire-once root creation and index load
//! - Connection: per-connection area bitmask, lock and flush flag
//! - SubscriptionIndex: in-memory exact/wildcard × online/offline maps
//! - recovery: index rebuild at startup and on reconnect
//! - TaskPool / FlushScheduler: single-flight asynchronous redelivery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod connection;
pub mod context;
pub mod flush;
pub mod index;
pub mod recovery;

pub use background::{PoolStats, SubmitError, Task, TaskExecutor, TaskPool};
pub use connection::Connection;
pub use context::StorageContext;
pub use flush::{FlushOutcome, FlushScheduler};
pub use index::{IndexCounts, Presence, Subscriber, SubscriptionIndex};
