//! Packet id locks
//!
//! A lock is the presence of `pkgids/<packet_id>`. Acquisition is a single
//! exclusive create, which makes it safe across threads and across processes
//! sharing the storage root without any in-memory lock.

use mqsession_core::{Error, PacketId, Result, StorageAreas};
use std::io;
use tracing::debug;

use crate::fs::{create_private_file, remove_if_exists};
use crate::paths::StorageLayout;
use crate::session::SessionStore;

/// Packet id reservation
pub struct PkgIdLock<'a> {
    layout: &'a StorageLayout,
}

impl<'a> PkgIdLock<'a> {
    pub(crate) fn new(layout: &'a StorageLayout) -> Self {
        PkgIdLock { layout }
    }

    /// Try to reserve `packet_id` for the client.
    ///
    /// `Ok(true)` if this call now holds the lock, `Ok(false)` if someone
    /// else does. Packet id 0 is never valid.
    pub fn acquire(&self, client_id: &str, packet_id: PacketId) -> Result<bool> {
        if packet_id < 1 {
            return Err(Error::invalid_input("packet id must be at least 1"));
        }
        let path = self.layout.pkgid_path(client_id, packet_id)?;
        let result = match create_private_file(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                SessionStore::new(self.layout).init_session(client_id, StorageAreas::PKGIDS)?;
                create_private_file(&path)
            }
            other => other,
        };
        match result {
            Ok(_) => {
                debug!(target: "mqsession::pkgid", client_id, packet_id, "Acquired packet id");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::storage(
                format!("locking packet id {}", path.display()),
                e,
            )),
        }
    }

    /// Release `packet_id`; releasing a lock nobody holds is fine.
    ///
    /// Returns whether a lock file was removed.
    pub fn release(&self, client_id: &str, packet_id: PacketId) -> Result<bool> {
        let path = self.layout.pkgid_path(client_id, packet_id)?;
        let removed = remove_if_exists(&path)
            .map_err(|e| Error::storage(format!("unlocking {}", path.display()), e))?;
        if removed {
            debug!(target: "mqsession::pkgid", client_id, packet_id, "Released packet id");
        }
        Ok(removed)
    }

    /// Whether `packet_id` is currently reserved
    pub fn is_held(&self, client_id: &str, packet_id: PacketId) -> Result<bool> {
        Ok(self.layout.pkgid_path(client_id, packet_id)?.exists())
    }
}
