//! Subscription records
//!
//! One file per topic filter under `subs/<shard>/`, body = the filter bytes.
//! A filter is already subscribed when a record in its shard has the same
//! length and content; within this process that check and the following
//! write are serialized per shard, across processes they are best effort.

use mqsession_core::{is_valid_filter, Error, Qos, Result, StorageAreas};
use std::fs::{self, DirEntry, ReadDir};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::{KeyedName, Stamp};
use crate::fs::{create_private_dir, is_side_file, read_dir_if_exists, remove_if_exists};
use crate::paths::StorageLayout;
use crate::record::{read_record, write_unique, RecordHeader, RecordKind};
use crate::session::SessionStore;
use crate::shard::ShardLocks;
use crate::store::find_keyed;

/// A stored subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Topic filter, possibly with wildcards
    pub topic_filter: String,
    /// Granted QoS
    pub qos: Qos,
    /// When the record was written
    pub created: Stamp,
}

/// Subscription operations for offline or online clients
pub struct SubscriptionStore<'a> {
    layout: &'a StorageLayout,
    locks: &'a ShardLocks,
}

fn validate_filter(topic_filter: &str) -> Result<()> {
    if topic_filter.is_empty() {
        return Err(Error::invalid_input("topic filter is empty"));
    }
    if !is_valid_filter(topic_filter) {
        return Err(Error::invalid_input(format!(
            "invalid topic filter '{}'",
            topic_filter
        )));
    }
    Ok(())
}

impl<'a> SubscriptionStore<'a> {
    pub(crate) fn new(layout: &'a StorageLayout, locks: &'a ShardLocks) -> Self {
        SubscriptionStore { layout, locks }
    }

    fn shard_dir(&self, client_id: &str, topic_filter: &str) -> Result<PathBuf> {
        self.layout.session_dir(client_id)?;
        validate_filter(topic_filter)?;
        let shard = self.layout.shard(topic_filter)?;
        self.layout.subs_shard_dir(client_id, shard)
    }

    /// Store a subscription.
    ///
    /// Returns `Ok(true)` if a record was written and `Ok(false)` if the
    /// filter was already stored (its QoS is left unchanged).
    pub fn subscribe(&self, client_id: &str, topic_filter: &str, qos: Qos) -> Result<bool> {
        let dir = self.shard_dir(client_id, topic_filter)?;
        SessionStore::new(self.layout).init_session(client_id, StorageAreas::SUBS)?;
        create_private_dir(&dir)
            .map_err(|e| Error::storage(format!("creating {}", dir.display()), e))?;

        let _guard = self.locks.lock(&dir);
        if find_keyed(&dir, topic_filter.as_bytes())?.is_some() {
            debug!(target: "mqsession::subs", client_id, topic_filter, "Already subscribed");
            return Ok(false);
        }

        let shard = self.layout.shard(topic_filter)?;
        let header = RecordHeader {
            kind: RecordKind::Subscription,
            qos,
            packet_id: 0,
            body_len: topic_filter.len() as u64,
            created_micros: 0,
        };
        let (name, _) = write_unique(&dir, header, topic_filter.as_bytes(), |stamp| {
            KeyedName {
                len: topic_filter.len() as u64,
                qos,
                shard,
                stamp,
            }
            .encode()
        })?;
        debug!(
            target: "mqsession::subs",
            client_id,
            topic_filter,
            %qos,
            record = %name,
            "Stored subscription"
        );
        Ok(true)
    }

    /// Remove a subscription; `Ok(false)` if it was not stored.
    pub fn unsubscribe(&self, client_id: &str, topic_filter: &str) -> Result<bool> {
        self.exists(client_id, topic_filter, true)
    }

    /// Whether `topic_filter` is stored for the client, optionally removing it.
    pub fn exists(&self, client_id: &str, topic_filter: &str, remove_if_found: bool) -> Result<bool> {
        let dir = self.shard_dir(client_id, topic_filter)?;
        let _guard = self.locks.lock(&dir);
        let Some((path, _)) = find_keyed(&dir, topic_filter.as_bytes())? else {
            return Ok(false);
        };
        if remove_if_found {
            remove_if_exists(&path)
                .map_err(|e| Error::storage(format!("removing {}", path.display()), e))?;
            debug!(target: "mqsession::subs", client_id, topic_filter, "Removed subscription");
        }
        Ok(true)
    }

    /// Number of subscription records, counted from directory listings only.
    pub fn count(&self, client_id: &str) -> Result<usize> {
        let subs = self.layout.subs_dir(client_id)?;
        let mut count = 0;
        for shard in list(&subs)? {
            if !shard.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            count += list(&shard.path())?
                .into_iter()
                .filter(|entry| is_record_file(entry))
                .count();
        }
        Ok(count)
    }

    /// Lazy sequence of the client's decoded subscriptions.
    ///
    /// Each call starts a fresh directory walk. Records that cannot be
    /// decoded are logged and skipped; records added or removed during the
    /// walk may or may not be seen.
    pub fn records(&self, client_id: &str) -> Result<SubscriptionRecords> {
        let subs = self.layout.subs_dir(client_id)?;
        let shards = read_dir_if_exists(&subs)
            .map_err(|e| Error::storage(format!("listing {}", subs.display()), e))?;
        Ok(SubscriptionRecords {
            client_id: client_id.to_string(),
            shards,
            current: None,
        })
    }

    /// Feed every stored subscription to `register`; returns how many were fed.
    pub fn iterate_and_register<F>(&self, client_id: &str, mut register: F) -> Result<usize>
    where
        F: FnMut(SubscriptionRecord),
    {
        let mut registered = 0;
        for record in self.records(client_id)? {
            register(record);
            registered += 1;
        }
        Ok(registered)
    }
}

fn list(dir: &Path) -> Result<Vec<DirEntry>> {
    let Some(entries) = read_dir_if_exists(dir)
        .map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?
    else {
        return Ok(Vec::new());
    };
    entries
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::storage(format!("listing {}", dir.display()), e))
}

fn is_record_file(entry: &DirEntry) -> bool {
    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
    is_file && entry.file_name().to_str().map_or(false, |n| !is_side_file(n))
}

/// Iterator returned by [`SubscriptionStore::records`]
pub struct SubscriptionRecords {
    client_id: String,
    shards: Option<ReadDir>,
    current: Option<ReadDir>,
}

impl SubscriptionRecords {
    fn decode(&self, entry: &DirEntry) -> Option<SubscriptionRecord> {
        if !is_record_file(entry) {
            return None;
        }
        let path = entry.path();
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(KeyedName::decode) else {
            warn!(
                target: "mqsession::subs",
                client_id = %self.client_id,
                path = %path.display(),
                "Skipping subscription with malformed name"
            );
            return None;
        };
        let body = match read_record(&path) {
            Ok(Some((header, body)))
                if header.kind == RecordKind::Subscription && body.len() as u64 == name.len =>
            {
                body
            }
            Ok(Some(_)) => {
                warn!(
                    target: "mqsession::subs",
                    client_id = %self.client_id,
                    path = %path.display(),
                    "Skipping subscription whose header disagrees with its name"
                );
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    target: "mqsession::subs",
                    client_id = %self.client_id,
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable subscription"
                );
                return None;
            }
        };
        match String::from_utf8(body) {
            Ok(topic_filter) => Some(SubscriptionRecord {
                topic_filter,
                qos: name.qos,
                created: name.stamp,
            }),
            Err(_) => {
                warn!(
                    target: "mqsession::subs",
                    client_id = %self.client_id,
                    path = %path.display(),
                    "Skipping subscription with non UTF-8 filter"
                );
                None
            }
        }
    }
}

impl Iterator for SubscriptionRecords {
    type Item = SubscriptionRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                match entries.next() {
                    Some(Ok(entry)) => {
                        if let Some(record) = self.decode(&entry) {
                            return Some(record);
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(target: "mqsession::subs", client_id = %self.client_id, error = %e, "Shard listing failed");
                        self.current = None;
                        continue;
                    }
                    None => self.current = None,
                }
            }

            let shard = match self.shards.as_mut()?.next()? {
                Ok(shard) => shard,
                Err(e) => {
                    warn!(target: "mqsession::subs", client_id = %self.client_id, error = %e, "Subscription listing failed");
                    self.shards = None;
                    return None;
                }
            };
            if shard.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                match fs::read_dir(shard.path()) {
                    Ok(entries) => self.current = Some(entries),
                    // shard removed mid-walk
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(
                            target: "mqsession::subs",
                            client_id = %self.client_id,
                            shard = %shard.path().display(),
                            error = %e,
                            "Skipping unreadable shard"
                        );
                    }
                }
            }
        }
    }
}
