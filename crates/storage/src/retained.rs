//! Retained messages
//!
//! Global store keyed by exact topic name. Each entry is a topic file
//! (`retained/<shard>/<len>-<qos>-<shard>-<sec>-<usec>`, body = topic name)
//! plus a `<name>.msg` payload file.
//!
//! `set` writes the payload first and then moves the topic file into place
//! through a `.tmp` rename, so lookups (which go through topic files) never
//! see a topic without its payload. A crash in between leaves an orphan
//! payload, which the next `set` in that shard sweeps away.

use mqsession_core::{is_valid_filter, is_valid_topic_name, topic_matches, Error, Qos, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::{KeyedName, Stamp};
use crate::fs::{
    create_private_dir_all, is_side_file, read_dir_if_exists, remove_if_exists, remove_or_warn,
    PAYLOAD_SUFFIX, TEMP_SUFFIX,
};
use crate::paths::StorageLayout;
use crate::record::{
    read_record, write_error, write_record, RecordHeader, RecordKind, MAX_NAME_ATTEMPTS,
};
use crate::shard::ShardLocks;
use crate::store::find_keyed;

/// A retained message read back from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    /// Exact topic name
    pub topic: String,
    /// QoS it was published with
    pub qos: Qos,
    /// Payload
    pub payload: Vec<u8>,
}

/// Retained message operations
pub struct RetainedStore<'a> {
    layout: &'a StorageLayout,
    locks: &'a ShardLocks,
}

fn payload_path(topic_file: &Path) -> PathBuf {
    let mut path = topic_file.as_os_str().to_owned();
    path.push(PAYLOAD_SUFFIX);
    PathBuf::from(path)
}

fn validate_topic(topic: &str) -> Result<()> {
    if !is_valid_topic_name(topic) {
        return Err(Error::invalid_input(format!(
            "invalid retained topic name '{}'",
            topic
        )));
    }
    Ok(())
}

fn remove_pair(topic_file: &Path) -> Result<()> {
    remove_if_exists(topic_file)
        .map_err(|e| Error::storage(format!("removing {}", topic_file.display()), e))?;
    let payload = payload_path(topic_file);
    remove_if_exists(&payload)
        .map_err(|e| Error::storage(format!("removing {}", payload.display()), e))?;
    Ok(())
}

impl<'a> RetainedStore<'a> {
    pub(crate) fn new(layout: &'a StorageLayout, locks: &'a ShardLocks) -> Self {
        RetainedStore { layout, locks }
    }

    fn shard_dir(&self, topic: &str) -> Result<(u32, PathBuf)> {
        validate_topic(topic)?;
        let shard = self.layout.shard(topic)?;
        Ok((shard, self.layout.retained_shard_dir(shard)))
    }

    /// Store `payload` as the retained message for `topic`, replacing any
    /// previous one.
    pub fn set(&self, topic: &str, qos: Qos, payload: &[u8]) -> Result<()> {
        let (shard, dir) = self.shard_dir(topic)?;
        let max = self.layout.max_message_size();
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        create_private_dir_all(&dir)
            .map_err(|e| Error::storage(format!("creating {}", dir.display()), e))?;

        let _guard = self.locks.lock(&dir);
        sweep_orphans(&dir)?;
        if let Some((previous, _)) = find_keyed(&dir, topic.as_bytes())? {
            remove_pair(&previous)?;
            debug!(target: "mqsession::retained", topic, "Replacing retained message");
        }

        let mut stamp = Stamp::now();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = KeyedName {
                len: topic.len() as u64,
                qos,
                shard,
                stamp,
            }
            .encode();
            let topic_file = dir.join(&name);
            if topic_file.exists() {
                stamp = stamp.bump();
                continue;
            }

            let payload_file = payload_path(&topic_file);
            let payload_header = RecordHeader {
                kind: RecordKind::RetainedPayload,
                qos,
                packet_id: 0,
                body_len: payload.len() as u64,
                created_micros: stamp.as_micros(),
            };
            match write_record(&payload_file, &payload_header, payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    stamp = stamp.bump();
                    continue;
                }
                Err(e) => return Err(write_error(&payload_file, e)),
            }

            if let Err(e) = self.publish_topic_file(&topic_file, topic, qos, stamp) {
                remove_or_warn(&payload_file);
                return Err(e);
            }
            debug!(
                target: "mqsession::retained",
                topic,
                %qos,
                size = payload.len(),
                record = %name,
                "Stored retained message"
            );
            return Ok(());
        }
        Err(Error::storage(
            format!("no free retained record name in {}", dir.display()),
            io::Error::from(io::ErrorKind::AlreadyExists),
        ))
    }

    fn publish_topic_file(&self, topic_file: &Path, topic: &str, qos: Qos, stamp: Stamp) -> Result<()> {
        let mut tmp = topic_file.as_os_str().to_owned();
        tmp.push(TEMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        let header = RecordHeader {
            kind: RecordKind::RetainedTopic,
            qos,
            packet_id: 0,
            body_len: topic.len() as u64,
            created_micros: stamp.as_micros(),
        };
        // a stale temp from a crashed writer would block the exclusive create
        remove_or_warn(&tmp);
        write_record(&tmp, &header, topic.as_bytes()).map_err(|e| write_error(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, topic_file) {
            remove_or_warn(&tmp);
            return Err(Error::storage(
                format!("renaming {} into place", tmp.display()),
                e,
            ));
        }
        Ok(())
    }

    /// Delete the retained message for `topic`; `Ok(false)` if there was none.
    pub fn release(&self, topic: &str) -> Result<bool> {
        let (_, dir) = self.shard_dir(topic)?;
        let _guard = self.locks.lock(&dir);
        let Some((topic_file, _)) = find_keyed(&dir, topic.as_bytes())? else {
            return Ok(false);
        };
        remove_pair(&topic_file)?;
        debug!(target: "mqsession::retained", topic, "Released retained message");
        Ok(true)
    }

    /// Take the retained message for `topic`.
    ///
    /// Retained delivery is single-shot: a message that is found is removed
    /// from storage as part of the lookup.
    pub fn recover(&self, topic: &str) -> Result<Option<RetainedMessage>> {
        let (_, dir) = self.shard_dir(topic)?;
        let _guard = self.locks.lock(&dir);
        let Some((topic_file, name)) = find_keyed(&dir, topic.as_bytes())? else {
            return Ok(None);
        };
        let payload_file = payload_path(&topic_file);
        let payload = match read_record(&payload_file) {
            Ok(Some((header, body))) if header.kind == RecordKind::RetainedPayload => body,
            Ok(Some(_)) | Err(Error::Corruption(_)) => {
                warn!(
                    target: "mqsession::retained",
                    topic,
                    path = %payload_file.display(),
                    "Retained payload unreadable, treating as absent"
                );
                return Ok(None);
            }
            Ok(None) => {
                warn!(target: "mqsession::retained", topic, "Retained topic without payload, removing");
                remove_pair(&topic_file)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        remove_pair(&topic_file)?;
        debug!(target: "mqsession::retained", topic, size = payload.len(), "Recovered retained message");
        Ok(Some(RetainedMessage {
            topic: topic.to_string(),
            qos: name.qos,
            payload,
        }))
    }

    /// Topic names of all retained messages selected by `topic_filter`, sorted.
    pub fn list_matching(&self, topic_filter: &str) -> Result<Vec<String>> {
        if !is_valid_filter(topic_filter) {
            return Err(Error::invalid_input(format!(
                "invalid topic filter '{}'",
                topic_filter
            )));
        }
        if self.layout.shard_count() == 0 {
            return Err(Error::ShardingDisabled);
        }
        let retained = self.layout.retained_dir();
        let shards = read_dir_if_exists(&retained)
            .map_err(|e| Error::storage(format!("listing {}", retained.display()), e))?;

        let mut topics = Vec::new();
        for shard in shards.into_iter().flatten().flatten() {
            if !shard.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Ok(Some(entries)) = read_dir_if_exists(&shard.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    continue;
                };
                if is_side_file(name) || KeyedName::decode(name).is_none() {
                    continue;
                }
                let path = entry.path();
                let body = match read_record(&path) {
                    Ok(Some((header, body))) if header.kind == RecordKind::RetainedTopic => body,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(
                            target: "mqsession::retained",
                            path = %path.display(),
                            error = %e,
                            "Skipping unreadable retained topic"
                        );
                        continue;
                    }
                };
                if let Ok(topic) = String::from_utf8(body) {
                    if topic_matches(&topic, topic_filter) {
                        topics.push(topic);
                    }
                }
            }
        }
        topics.sort();
        topics.dedup();
        Ok(topics)
    }
}

/// Remove payloads whose topic file is missing and leftover temp files.
///
/// Callers hold the shard lock, so nothing in this process is mid-write here.
fn sweep_orphans(dir: &Path) -> Result<()> {
    let Some(entries) = read_dir_if_exists(dir)
        .map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?
    else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let orphan = if let Some(base) = name.strip_suffix(TEMP_SUFFIX) {
            !base.is_empty()
        } else if let Some(base) = name.strip_suffix(PAYLOAD_SUFFIX) {
            !dir.join(base).exists()
        } else {
            false
        };
        if orphan {
            let path = entry.path();
            remove_if_exists(&path)
                .map_err(|e| Error::storage(format!("removing {}", path.display()), e))?;
            debug!(target: "mqsession::retained", path = %path.display(), "Removed orphaned retained file");
        }
    }
    Ok(())
}
