//! Size limits and fixed constants

/// Default number of shard directories for subscriptions and retained messages
pub const DEFAULT_SHARD_COUNT: u32 = 4096;

/// Largest payload an MQTT packet can carry (maximum remaining length)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 268_435_455;

/// Chunk size used when comparing stored topic filters against a candidate
pub const READ_CHUNK_SIZE: usize = 4096;

/// Largest packet id the protocol can put on the wire.
///
/// Queued messages may use ids above this for QoS 0 traffic.
pub const MAX_PROTOCOL_PACKET_ID: u64 = 65_535;

/// Directory name (under the storage root) holding retained messages
pub const RETAINED_DIR: &str = "retained";

/// Name of the storage directory created under `$HOME` or the working directory
pub const DEFAULT_STORAGE_DIR: &str = ".mqsession-storage";
