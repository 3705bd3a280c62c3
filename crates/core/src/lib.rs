//! Core types for mqsession
//!
//! This crate defines the foundational pieces shared by the storage and
//! engine crates:
//! - Error: error taxonomy and `Result` alias
//! - Qos, PacketId, StorageAreas: session data types
//! - StorageConfig: storage root, shard count, payload limit
//! - topic: MQTT topic filter matching and validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod limits;
pub mod topic;
pub mod types;

pub use config::StorageConfig;
pub use error::{Error, Result};
pub use topic::{is_valid_filter, is_valid_topic_name, is_wildcard, topic_matches};
pub use types::{validate_client_id, PacketId, Qos, StorageAreas};
