//! Callbacks into the surrounding broker/client
//!
//! [`StorageHooks`] observes queued-message store and release (and may veto a
//! store, e.g. for quota enforcement). [`Redelivery`] receives queued
//! messages during a flush and takes ownership of their files.

use mqsession_core::{PacketId, Qos, Result};

use crate::message::QueuedMessage;

/// A queued message about to be stored
#[derive(Debug, Clone, Copy)]
pub struct StoreEvent<'a> {
    /// Owning client
    pub client_id: &'a str,
    /// Live connection storing the message, `None` for offline stores
    pub connection_id: Option<u64>,
    /// Packet id
    pub packet_id: PacketId,
    /// Delivery QoS
    pub qos: Qos,
    /// Payload to be stored
    pub payload: &'a [u8],
}

/// A queued message about to be removed
#[derive(Debug, Clone, Copy)]
pub struct ReleaseEvent<'a> {
    /// Owning client
    pub client_id: &'a str,
    /// Packet id decoded from the record name
    pub packet_id: PacketId,
    /// QoS decoded from the record name
    pub qos: Qos,
}

/// Admission and observability callbacks for queued messages.
///
/// Both methods have no-op defaults.
pub trait StorageHooks: Send + Sync {
    /// Called before a message is written; returning `false` vetoes it.
    fn on_store(&self, _event: &StoreEvent<'_>) -> bool {
        true
    }

    /// Called before a stored message file is removed.
    fn on_release(&self, _event: &ReleaseEvent<'_>) {}
}

/// Hooks that accept everything and observe nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl StorageHooks for NoHooks {}

/// Receiver of queued messages during a flush.
///
/// The implementation owns the message's file from the moment it is called:
/// it must eventually remove it (normally through
/// [`MessageStore::release`](crate::MessageStore::release) once the peer
/// acknowledged, or right away if it decides to drop the message). An error
/// leaves the file in place for the next flush.
pub trait Redelivery: Send + Sync {
    /// Hand one queued message to the transport.
    fn redeliver(&self, message: QueuedMessage) -> Result<()>;
}

impl<F> Redelivery for F
where
    F: Fn(QueuedMessage) -> Result<()> + Send + Sync,
{
    fn redeliver(&self, message: QueuedMessage) -> Result<()> {
        self(message)
    }
}
