//! Storage handle bundling the layout with shared lock and hook state

use mqsession_core::{Error, Result, StorageConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::KeyedName;
use crate::fs::{is_side_file, read_dir_if_exists};
use crate::hooks::{NoHooks, StorageHooks};
use crate::message::MessageStore;
use crate::paths::StorageLayout;
use crate::pkgid::PkgIdLock;
use crate::record::body_equals;
use crate::retained::RetainedStore;
use crate::session::SessionStore;
use crate::shard::ShardLocks;
use crate::subscription::SubscriptionStore;

/// Filesystem session storage rooted at one directory.
///
/// Cheap to clone. The per-area stores are borrowed views:
///
/// ```no_run
/// use mqsession_core::{Qos, StorageAreas, StorageConfig};
/// use mqsession_storage::Storage;
///
/// let storage = Storage::open(&StorageConfig::at("/tmp/mq"))?;
/// storage.sessions().init_session("dev1", StorageAreas::ALL)?;
/// storage.subscriptions().subscribe("dev1", "sensors/#", Qos::AtLeastOnce)?;
/// # Ok::<(), mqsession_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Storage {
    layout: StorageLayout,
    locks: Arc<ShardLocks>,
    hooks: Arc<dyn StorageHooks>,
}

impl Storage {
    /// Storage over an explicit layout, without hooks
    pub fn new(layout: StorageLayout) -> Self {
        Storage {
            layout,
            locks: Arc::new(ShardLocks::new()),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Validate a configuration and build storage from it.
    ///
    /// Nothing is created on disk until the first operation.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Storage::new(StorageLayout::from_config(config)))
    }

    /// Install message store/release hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn StorageHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Same locks and hooks over a different layout
    pub fn relocated(&self, layout: StorageLayout) -> Self {
        Storage {
            layout,
            locks: Arc::clone(&self.locks),
            hooks: Arc::clone(&self.hooks),
        }
    }

    /// Directory layout
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Installed hooks
    pub fn hooks(&self) -> &dyn StorageHooks {
        self.hooks.as_ref()
    }

    /// Session directories
    pub fn sessions(&self) -> SessionStore<'_> {
        SessionStore::new(&self.layout)
    }

    /// Subscription records
    pub fn subscriptions(&self) -> SubscriptionStore<'_> {
        SubscriptionStore::new(&self.layout, &self.locks)
    }

    /// Queued messages
    pub fn messages(&self) -> MessageStore<'_> {
        MessageStore::new(&self.layout, self.hooks.as_ref())
    }

    /// Retained messages
    pub fn retained(&self) -> RetainedStore<'_> {
        RetainedStore::new(&self.layout, &self.locks)
    }

    /// Packet id locks
    pub fn pkgids(&self) -> PkgIdLock<'_> {
        PkgIdLock::new(&self.layout)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Find the record in a shard directory whose body is exactly `key`.
///
/// Names whose length field differs are skipped without opening the file.
/// Unreadable records are logged and skipped.
pub(crate) fn find_keyed(dir: &Path, key: &[u8]) -> Result<Option<(PathBuf, KeyedName)>> {
    let entries = read_dir_if_exists(dir)
        .map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?;
    let Some(entries) = entries else {
        return Ok(None);
    };
    for entry in entries {
        let entry = entry.map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if is_side_file(name) {
            continue;
        }
        let Some(decoded) = KeyedName::decode(name) else {
            continue;
        };
        if decoded.len != key.len() as u64 {
            continue;
        }
        let path = entry.path();
        match body_equals(&path, key) {
            Ok(true) => return Ok(Some((path, decoded))),
            Ok(false) => {}
            Err(Error::Corruption(reason)) => {
                tracing::warn!(
                    target: "mqsession::storage",
                    path = %path.display(),
                    %reason,
                    "Skipping unreadable record"
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}
