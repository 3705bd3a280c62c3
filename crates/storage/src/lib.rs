//! Filesystem storage for MQTT session state
//!
//! This crate implements the on-disk side of the session engine:
//! - SessionStore: per-client directories and their areas
//! - SubscriptionStore: sharded, content-deduplicated subscription records
//! - MessageStore: queued messages, quota accounting, flush to redelivery
//! - RetainedStore: global retained messages with filter lookup
//! - PkgIdLock: cross-process packet id reservation by exclusive create
//!
//! Record files carry a checksummed header (see [`record`]); their names
//! carry the metadata needed for listing (see [`codec`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod fs;
pub mod hooks;
pub mod message;
pub mod paths;
pub mod pkgid;
pub mod record;
pub mod retained;
pub mod session;
pub mod shard;
mod store;
pub mod subscription;

pub use codec::{KeyedName, MessageName, Stamp};
pub use hooks::{NoHooks, Redelivery, ReleaseEvent, StorageHooks, StoreEvent};
pub use message::{FlushStats, MessageHandle, MessageStore, QueuedMessage};
pub use paths::StorageLayout;
pub use pkgid::PkgIdLock;
pub use record::{RecordHeader, RecordKind};
pub use retained::{RetainedMessage, RetainedStore};
pub use session::SessionStore;
pub use shard::{ShardIndex, ShardLocks};
pub use store::Storage;
pub use subscription::{SubscriptionRecord, SubscriptionRecords, SubscriptionStore};
