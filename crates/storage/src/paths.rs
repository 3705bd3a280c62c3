//! Storage directory layout
//!
//! ```text
//! <root>/
//! ├── retained/
//! │   └── <shard>/
//! │       ├── <len>-<qos>-<shard>-<sec>-<usec>       # topic name
//! │       └── <len>-<qos>-<shard>-<sec>-<usec>.msg   # payload
//! └── <client_id>/
//!     ├── msgs/<packet_id>-<size>-<qos>-<sec>-<usec>
//!     ├── subs/<shard>/<len>-<qos>-<shard>-<sec>-<usec>
//!     ├── will/
//!     └── pkgids/<packet_id>
//! ```

use mqsession_core::limits::RETAINED_DIR;
use mqsession_core::{validate_client_id, Error, PacketId, Result, StorageConfig};
use std::path::{Path, PathBuf};

use crate::shard::ShardIndex;

/// Resolved storage root plus the settings that shape paths under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    shard_count: u32,
    max_message_size: usize,
}

impl StorageLayout {
    /// Layout for an explicit root with default limits
    pub fn new(root: impl Into<PathBuf>, shard_count: u32) -> Self {
        StorageLayout {
            root: root.into(),
            shard_count,
            max_message_size: mqsession_core::limits::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Layout described by a configuration (root resolved now)
    pub fn from_config(config: &StorageConfig) -> Self {
        StorageLayout {
            root: config.resolve_root(),
            shard_count: config.shard_count,
            max_message_size: config.max_message_size,
        }
    }

    /// Same layout with a different payload limit
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shard count (0 = subscriptions and retained messages disabled)
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Largest payload accepted by the message and retained stores
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Shard of `key`, failing closed when sharding is disabled
    pub fn shard(&self, key: &str) -> Result<u32> {
        ShardIndex::shard(key, self.shard_count).ok_or(Error::ShardingDisabled)
    }

    /// `<root>/retained`
    pub fn retained_dir(&self) -> PathBuf {
        self.root.join(RETAINED_DIR)
    }

    /// `<root>/retained/<shard>`
    pub fn retained_shard_dir(&self, shard: u32) -> PathBuf {
        self.retained_dir().join(shard.to_string())
    }

    /// `<root>/<client_id>`, rejecting identifiers that are not a plain name
    pub fn session_dir(&self, client_id: &str) -> Result<PathBuf> {
        validate_client_id(client_id)?;
        Ok(self.root.join(client_id))
    }

    /// `<root>/<client_id>/<area>`
    pub fn area_dir(&self, client_id: &str, area: &str) -> Result<PathBuf> {
        Ok(self.session_dir(client_id)?.join(area))
    }

    /// Queued message directory
    pub fn msgs_dir(&self, client_id: &str) -> Result<PathBuf> {
        self.area_dir(client_id, "msgs")
    }

    /// Subscription directory (parent of the shard directories)
    pub fn subs_dir(&self, client_id: &str) -> Result<PathBuf> {
        self.area_dir(client_id, "subs")
    }

    /// `<root>/<client_id>/subs/<shard>`
    pub fn subs_shard_dir(&self, client_id: &str, shard: u32) -> Result<PathBuf> {
        Ok(self.subs_dir(client_id)?.join(shard.to_string()))
    }

    /// Will message directory
    pub fn will_dir(&self, client_id: &str) -> Result<PathBuf> {
        self.area_dir(client_id, "will")
    }

    /// Packet id lock directory
    pub fn pkgids_dir(&self, client_id: &str) -> Result<PathBuf> {
        self.area_dir(client_id, "pkgids")
    }

    /// Lock file for one packet id
    pub fn pkgid_path(&self, client_id: &str, packet_id: PacketId) -> Result<PathBuf> {
        Ok(self.pkgids_dir(client_id)?.join(packet_id.to_string()))
    }
}
