//! Error types for mqsession
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Filesystem failures are always reported through [`Error::storage`], which
//! captures the OS error together with the effective uid/gid of the process
//! and logs it, so permission problems on the storage root can be diagnosed
//! from the log alone.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mqsession operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the session store
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an unusable argument (empty identifier, packet id 0, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem operation failed
    #[error("Storage error: {context}: {source} (errno={errno:?}, uid={uid}, gid={gid})")]
    Storage {
        /// What the engine was doing
        context: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
        /// Raw OS error code, when the platform provided one
        errno: Option<i32>,
        /// Effective uid of the process at the time of the failure
        uid: u32,
        /// Effective gid of the process at the time of the failure
        gid: u32,
    },

    /// A write left fewer bytes on disk than requested
    #[error("Short write to {path}: expected {expected} bytes, wrote {written}")]
    ShortWrite {
        /// File that was being written (already removed)
        path: PathBuf,
        /// Bytes requested
        expected: u64,
        /// Bytes actually on disk
        written: u64,
    },

    /// A stored record could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Payload exceeds the configured maximum message size
    #[error("Payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// An admission hook vetoed the operation
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Shard count is zero, subscription and retained storage are unavailable
    #[error("Sharding disabled: shard count is 0")]
    ShardingDisabled,
}

impl Error {
    /// Build a storage error and log it with the OS error code and the
    /// effective uid/gid of the process.
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        let (uid, gid) = effective_ids();
        let errno = source.raw_os_error();
        tracing::error!(
            target: "mqsession::storage",
            %context,
            error = %source,
            errno = ?errno,
            uid,
            gid,
            "STORAGE ERROR"
        );
        Error::Storage {
            context,
            source,
            errno,
            uid,
            gid,
        }
    }

    /// Shorthand for [`Error::InvalidInput`]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Shorthand for [`Error::Corruption`]
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Returns true for errors caused by the caller's arguments
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }

    /// Returns the underlying `io::ErrorKind` for storage errors
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Storage { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

#[cfg(unix)]
fn effective_ids() -> (u32, u32) {
    // SAFETY: geteuid/getegid take no arguments and cannot fail.
    unsafe { (libc::geteuid(), libc::getegid()) }
}

#[cfg(not(unix))]
fn effective_ids() -> (u32, u32) {
    (0, 0)
}
