//! Queued messages
//!
//! One file per message under `msgs/`, named
//! `<packet_id>-<size>-<qos>-<sec>-<usec>` with the payload as record body.
//! Count and quota come from the names alone; the header is checked when a
//! message is read back.

use mqsession_core::{Error, PacketId, Qos, Result, StorageAreas};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::MessageName;
use crate::fs::{is_side_file, read_dir_if_exists, remove_if_exists};
use crate::hooks::{Redelivery, ReleaseEvent, StorageHooks, StoreEvent};
use crate::paths::StorageLayout;
use crate::record::{read_record, write_unique, RecordHeader, RecordKind};
use crate::session::SessionStore;

/// Handle to one stored message file.
///
/// Whoever holds it is responsible for passing it to
/// [`MessageStore::release`] once the message is done with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    client_id: String,
    name: MessageName,
    path: PathBuf,
}

impl MessageHandle {
    /// Owning client
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Packet id
    pub fn packet_id(&self) -> PacketId {
        self.name.packet_id
    }

    /// Delivery QoS
    pub fn qos(&self) -> Qos {
        self.name.qos
    }

    /// Declared payload size
    pub fn size(&self) -> u64 {
        self.name.size
    }

    /// Decoded file name
    pub fn name(&self) -> &MessageName {
        &self.name
    }

    /// Location of the message file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A queued message read back for redelivery
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Owning client
    pub client_id: String,
    /// Packet id
    pub packet_id: PacketId,
    /// Delivery QoS
    pub qos: Qos,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// File backing the message; the receiver must release it
    pub handle: MessageHandle,
}

/// Outcome of a flush pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Messages handed to the redelivery callback
    pub delivered: usize,
    /// Messages the callback refused (left on disk)
    pub failed: usize,
    /// Messages that could not be read (left on disk)
    pub skipped: usize,
}

/// Queued message operations
pub struct MessageStore<'a> {
    layout: &'a StorageLayout,
    hooks: &'a dyn StorageHooks,
}

impl<'a> MessageStore<'a> {
    pub(crate) fn new(layout: &'a StorageLayout, hooks: &'a dyn StorageHooks) -> Self {
        MessageStore { layout, hooks }
    }

    /// Store a message for an offline client.
    ///
    /// The store hook is consulted first and may veto with
    /// [`Error::Rejected`].
    pub fn store(
        &self,
        client_id: &str,
        packet_id: PacketId,
        qos: Qos,
        payload: &[u8],
    ) -> Result<MessageHandle> {
        self.store_inner(None, client_id, packet_id, qos, payload)
    }

    /// Store a message on behalf of a live connection.
    ///
    /// The store hook sees `connection_id` and is called exactly once.
    pub fn store_on_connection(
        &self,
        connection_id: u64,
        client_id: &str,
        packet_id: PacketId,
        qos: Qos,
        payload: &[u8],
    ) -> Result<MessageHandle> {
        self.store_inner(Some(connection_id), client_id, packet_id, qos, payload)
    }

    fn store_inner(
        &self,
        connection_id: Option<u64>,
        client_id: &str,
        packet_id: PacketId,
        qos: Qos,
        payload: &[u8],
    ) -> Result<MessageHandle> {
        let dir = self.layout.msgs_dir(client_id)?;
        let max = self.layout.max_message_size();
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        let event = StoreEvent {
            client_id,
            connection_id,
            packet_id,
            qos,
            payload,
        };
        if !self.hooks.on_store(&event) {
            debug!(target: "mqsession::msgs", client_id, packet_id, "Store vetoed by hook");
            return Err(Error::Rejected(format!(
                "store of packet {} for '{}' vetoed",
                packet_id, client_id
            )));
        }

        SessionStore::new(self.layout).init_session(client_id, StorageAreas::MSGS)?;
        let header = RecordHeader {
            kind: RecordKind::Message,
            qos,
            packet_id,
            body_len: payload.len() as u64,
            created_micros: 0,
        };
        let (file_name, stamp) = write_unique(&dir, header, payload, |stamp| {
            MessageName {
                packet_id,
                size: payload.len() as u64,
                qos,
                stamp,
            }
            .encode()
        })?;
        debug!(
            target: "mqsession::msgs",
            client_id,
            packet_id,
            %qos,
            size = payload.len(),
            "Stored message"
        );
        Ok(MessageHandle {
            client_id: client_id.to_string(),
            name: MessageName {
                packet_id,
                size: payload.len() as u64,
                qos,
                stamp,
            },
            path: dir.join(file_name),
        })
    }

    /// Read a stored message's payload.
    ///
    /// `Ok(None)` if the file is gone. A header that disagrees with the
    /// file name is corruption.
    pub fn read(&self, handle: &MessageHandle) -> Result<Option<Vec<u8>>> {
        let Some((header, body)) = read_record(&handle.path)? else {
            return Ok(None);
        };
        if header.kind != RecordKind::Message
            || header.packet_id != handle.name.packet_id
            || header.body_len != handle.name.size
        {
            return Err(Error::corruption(format!(
                "{}: header does not match file name",
                handle.path.display()
            )));
        }
        Ok(Some(body))
    }

    /// Remove a stored message.
    ///
    /// The release hook is told the packet id and QoS from the file name.
    /// Returns whether the file was still there.
    pub fn release(&self, handle: MessageHandle) -> Result<bool> {
        self.hooks.on_release(&ReleaseEvent {
            client_id: &handle.client_id,
            packet_id: handle.name.packet_id,
            qos: handle.name.qos,
        });
        let removed = remove_if_exists(&handle.path)
            .map_err(|e| Error::storage(format!("removing {}", handle.path.display()), e))?;
        debug!(
            target: "mqsession::msgs",
            client_id = %handle.client_id,
            packet_id = handle.name.packet_id,
            removed,
            "Released message"
        );
        Ok(removed)
    }

    /// Stored messages, oldest first.
    ///
    /// Files with undecodable names are ignored.
    pub fn list(&self, client_id: &str) -> Result<Vec<MessageHandle>> {
        let dir = self.layout.msgs_dir(client_id)?;
        let entries = read_dir_if_exists(&dir)
            .map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?;
        let mut handles = Vec::new();
        for entry in entries.into_iter().flatten() {
            let entry = entry.map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .filter(|n| !is_side_file(n))
                .and_then(MessageName::decode)
            else {
                continue;
            };
            handles.push(MessageHandle {
                client_id: client_id.to_string(),
                name,
                path: entry.path(),
            });
        }
        handles.sort_by_key(|h| (h.name.stamp, h.name.packet_id));
        Ok(handles)
    }

    /// Number of queued messages
    pub fn count(&self, client_id: &str) -> Result<usize> {
        Ok(self.list(client_id)?.len())
    }

    /// Sum of the payload sizes declared in the queued messages' names.
    ///
    /// Files are neither opened nor stat-ed, so a file whose content was
    /// altered after storing is still accounted at its original size.
    pub fn quota(&self, client_id: &str) -> Result<u64> {
        Ok(self
            .list(client_id)?
            .iter()
            .map(|h| h.name.size)
            .fold(0u64, u64::saturating_add))
    }

    /// Hand every queued message to `redelivery`, oldest first.
    ///
    /// Delivered messages stay on disk until the receiver releases them.
    /// Unreadable messages are logged and left in place.
    pub fn flush(&self, client_id: &str, redelivery: &dyn Redelivery) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        for handle in self.list(client_id)? {
            let payload = match self.read(&handle) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        target: "mqsession::msgs",
                        client_id,
                        path = %handle.path.display(),
                        error = %e,
                        "Skipping unreadable queued message"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };
            let packet_id = handle.name.packet_id;
            let message = QueuedMessage {
                client_id: client_id.to_string(),
                packet_id,
                qos: handle.name.qos,
                payload,
                handle,
            };
            match redelivery.redeliver(message) {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    warn!(
                        target: "mqsession::msgs",
                        client_id,
                        packet_id,
                        error = %e,
                        "Redelivery failed, message kept"
                    );
                    stats.failed += 1;
                }
            }
        }
        debug!(
            target: "mqsession::msgs",
            client_id,
            delivered = stats.delivered,
            failed = stats.failed,
            skipped = stats.skipped,
            "Flushed queued messages"
        );
        Ok(stats)
    }
}
