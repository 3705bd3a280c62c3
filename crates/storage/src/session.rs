//! Session directories
//!
//! A session is `<root>/<client_id>` with the `msgs`, `subs`, `will` and
//! `pkgids` areas below it. Areas are created on demand and never removed by
//! clearing; clearing empties them.

use mqsession_core::limits::RETAINED_DIR;
use mqsession_core::{validate_client_id, Error, Result, StorageAreas};
use std::io;
use std::path::PathBuf;
use tracing::debug;

use crate::fs::{clear_dir_contents, create_private_dir, create_private_dir_all, read_dir_if_exists};
use crate::paths::StorageLayout;

/// Session directory operations
pub struct SessionStore<'a> {
    layout: &'a StorageLayout,
}

impl<'a> SessionStore<'a> {
    pub(crate) fn new(layout: &'a StorageLayout) -> Self {
        SessionStore { layout }
    }

    /// Create the storage root and its `retained` directory if missing.
    pub fn ensure_base_storage(&self) -> Result<()> {
        let root = self.layout.root();
        create_private_dir_all(root)
            .map_err(|e| Error::storage(format!("creating storage root {}", root.display()), e))?;
        let retained = self.layout.retained_dir();
        create_private_dir(&retained)
            .map_err(|e| Error::storage(format!("creating {}", retained.display()), e))?;
        Ok(())
    }

    /// Create the session directory and the requested areas.
    ///
    /// Returns the areas this call created; empty when everything already
    /// existed. Concurrent callers never fail because another one won the
    /// race to create a directory.
    pub fn init_session(&self, client_id: &str, areas: StorageAreas) -> Result<StorageAreas> {
        let session_dir = self.layout.session_dir(client_id)?;
        let session_created = match create_private_dir(&session_dir) {
            Ok(created) => created,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.ensure_base_storage()?;
                create_private_dir(&session_dir).map_err(|e| {
                    Error::storage(format!("creating session {}", session_dir.display()), e)
                })?
            }
            Err(e) => {
                return Err(Error::storage(
                    format!("creating session {}", session_dir.display()),
                    e,
                ))
            }
        };

        let mut created = StorageAreas::empty();
        for (flag, name) in StorageAreas::DIRS {
            if !areas.contains(flag) {
                continue;
            }
            let dir = session_dir.join(name);
            if create_private_dir(&dir)
                .map_err(|e| Error::storage(format!("creating {}", dir.display()), e))?
            {
                created |= flag;
            }
        }

        if session_created || !created.is_empty() {
            debug!(
                target: "mqsession::session",
                client_id,
                session_created,
                areas = ?created,
                "Initialized session storage"
            );
        }
        Ok(created)
    }

    /// Delete everything stored in the requested areas.
    ///
    /// A session or area that does not exist is already clear. Returns the
    /// number of files removed.
    pub fn clear_session(&self, client_id: &str, areas: StorageAreas) -> Result<u64> {
        let session_dir = self.layout.session_dir(client_id)?;
        if !session_dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for name in areas.dir_names() {
            let dir = session_dir.join(name);
            removed += clear_dir_contents(&dir)
                .map_err(|e| Error::storage(format!("clearing {}", dir.display()), e))?;
        }
        debug!(
            target: "mqsession::session",
            client_id,
            areas = ?areas,
            removed,
            "Cleared session storage"
        );
        Ok(removed)
    }

    /// Client identifiers that have a session directory, sorted
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let root = self.layout.root();
        let entries = read_dir_if_exists(root)
            .map_err(|e| Error::storage(format!("listing {}", root.display()), e))?;
        let mut sessions = Vec::new();
        for entry in entries.into_iter().flatten() {
            let entry =
                entry.map_err(|e| Error::storage(format!("listing {}", root.display()), e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_dir && name != RETAINED_DIR && validate_client_id(&name).is_ok() {
                sessions.push(name);
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Whether a session directory exists for `client_id`
    pub fn exists(&self, client_id: &str) -> Result<bool> {
        Ok(self.layout.session_dir(client_id)?.is_dir())
    }

    /// Location of the session's will area.
    ///
    /// Will content is owned by the caller; this store only creates and
    /// clears the directory.
    pub fn will_dir(&self, client_id: &str) -> Result<PathBuf> {
        self.layout.will_dir(client_id)
    }
}
