//! Core types shared by the storage and engine crates
//!
//! - Qos: MQTT quality-of-service level
//! - PacketId: packet identifier (wider than the protocol's 16 bits)
//! - StorageAreas: bitmask selecting the per-session storage areas

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::limits::RETAINED_DIR;

/// Packet identifier.
///
/// Real MQTT packet ids fit in 16 bits, but queued QoS 0 messages are stored
/// under synthetic ids above that range, so the type is unbounded.
pub type PacketId = u64;

/// MQTT quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    /// Fire and forget
    AtMostOnce = 0,
    /// Acknowledged delivery
    AtLeastOnce = 1,
    /// Assured single delivery
    ExactlyOnce = 2,
}

impl Qos {
    /// Numeric level (0, 1 or 2)
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Qos {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(Error::invalid_input(format!("invalid QoS level {}", other))),
        }
    }
}

impl TryFrom<u64> for Qos {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        u8::try_from(value)
            .map_err(|_| Error::invalid_input(format!("invalid QoS level {}", value)))
            .and_then(Qos::try_from)
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

bitflags! {
    /// Per-session storage areas.
    ///
    /// Used both to request initialization/clearing and as the per-connection
    /// record of which areas are already known to exist.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StorageAreas: u8 {
        /// Queued messages (`msgs`)
        const MSGS = 0b0001;
        /// Subscriptions (`subs`)
        const SUBS = 0b0010;
        /// Will message (`will`)
        const WILL = 0b0100;
        /// Packet id locks (`pkgids`)
        const PKGIDS = 0b1000;
        /// Every area
        const ALL = Self::MSGS.bits() | Self::SUBS.bits() | Self::WILL.bits() | Self::PKGIDS.bits();
    }
}

impl StorageAreas {
    /// Directory name and flag for each individual area, in creation order
    pub const DIRS: [(StorageAreas, &'static str); 4] = [
        (StorageAreas::MSGS, "msgs"),
        (StorageAreas::SUBS, "subs"),
        (StorageAreas::WILL, "will"),
        (StorageAreas::PKGIDS, "pkgids"),
    ];

    /// Directory names for the areas set in `self`
    pub fn dir_names(self) -> impl Iterator<Item = &'static str> {
        Self::DIRS
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

/// Check that a client identifier can name a session directory.
///
/// It must be a single non-empty path component, not `.`/`..`, and not the
/// reserved retained-message directory name.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() {
        return Err(Error::invalid_input("client identifier is empty"));
    }
    if client_id == "." || client_id == ".." || client_id == RETAINED_DIR {
        return Err(Error::invalid_input(format!(
            "client identifier '{}' is reserved",
            client_id
        )));
    }
    if client_id.contains(&['/', '\\', '\0'][..]) {
        return Err(Error::invalid_input(format!(
            "client identifier '{}' is not a single path component",
            client_id.escape_default()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_try_from() {
        assert_eq!(Qos::try_from(0u8).unwrap(), Qos::AtMostOnce);
        assert_eq!(Qos::try_from(1u8).unwrap(), Qos::AtLeastOnce);
        assert_eq!(Qos::try_from(2u8).unwrap(), Qos::ExactlyOnce);
        assert!(Qos::try_from(3u8).is_err());
        assert!(Qos::try_from(300u64).is_err());
        assert_eq!(Qos::try_from(2u64).unwrap(), Qos::ExactlyOnce);
    }

    #[test]
    fn test_qos_display() {
        assert_eq!(Qos::ExactlyOnce.to_string(), "2");
    }

    #[test]
    fn test_area_dir_names() {
        let names: Vec<_> = StorageAreas::ALL.dir_names().collect();
        assert_eq!(names, vec!["msgs", "subs", "will", "pkgids"]);

        let names: Vec<_> = (StorageAreas::MSGS | StorageAreas::PKGIDS)
            .dir_names()
            .collect();
        assert_eq!(names, vec!["msgs", "pkgids"]);

        assert_eq!(StorageAreas::empty().dir_names().count(), 0);
    }

    #[test]
    fn test_client_id_validation() {
        assert!(validate_client_id("dev1").is_ok());
        assert!(validate_client_id("sensor.kitchen-01").is_ok());
        assert!(validate_client_id("").is_err());
        assert!(validate_client_id(".").is_err());
        assert!(validate_client_id("..").is_err());
        assert!(validate_client_id("retained").is_err());
        assert!(validate_client_id("a/b").is_err());
        assert!(validate_client_id("a\\b").is_err());
        assert!(validate_client_id("a\0b").is_err());
    }

    #[test]
    fn test_all_contains_every_area() {
        for (flag, _) in StorageAreas::DIRS {
            assert!(StorageAreas::ALL.contains(flag));
        }
    }
}
