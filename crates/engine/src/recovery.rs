//! Subscription index rebuild from disk
//!
//! ## How It Works
//!
//! 1. Every session directory under the storage root is a candidate client.
//! 2. Its subscription files are counted without decoding them.
//! 3. Sessions with at least one subscription are decoded record by record
//!    and registered in the index as offline; nobody is connected yet.
//!
//! A session that cannot be read is logged and skipped so one bad directory
//! does not keep the rest from loading.

use mqsession_core::Result;
use mqsession_storage::Storage;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::index::{Presence, SubscriptionIndex};

/// Register every stored subscription as offline; returns how many.
pub fn load_all(storage: &Storage, index: &SubscriptionIndex) -> Result<usize> {
    let sessions = storage.sessions().list_sessions()?;
    let mut sessions_loaded = 0usize;
    let mut subscriptions = 0usize;

    for client_id in &sessions {
        match load_session(storage, index, client_id) {
            Ok(0) => {}
            Ok(n) => {
                sessions_loaded += 1;
                subscriptions += n;
            }
            Err(e) => warn!(
                target: "mqsession::recovery",
                client_id = %client_id,
                error = %e,
                "Skipping session during recovery"
            ),
        }
    }

    info!(
        target: "mqsession::recovery",
        sessions_scanned = sessions.len(),
        sessions_loaded,
        subscriptions,
        "Subscription index loaded from storage"
    );
    Ok(subscriptions)
}

fn load_session(storage: &Storage, index: &SubscriptionIndex, client_id: &str) -> Result<usize> {
    let subs = storage.subscriptions();
    if subs.count(client_id)? == 0 {
        return Ok(0);
    }
    subs.iterate_and_register(client_id, |record| {
        index.register(client_id, &record.topic_filter, record.qos, Presence::Offline);
    })
}

/// Bring a reconnecting client's subscriptions online.
///
/// Offline index entries move to the online maps, then every stored
/// subscription is registered online so entries missing from the index
/// (stored by another process) show up too. Returns the stored count.
pub fn recover_session(
    storage: &Storage,
    index: &SubscriptionIndex,
    conn: &Connection,
) -> Result<usize> {
    let client_id = conn.client_id();
    let moved = index.move_offline_to_online(client_id);
    let registered = storage
        .subscriptions()
        .iterate_and_register(client_id, |record| {
            index.register(client_id, &record.topic_filter, record.qos, Presence::Online);
        })?;
    debug!(
        target: "mqsession::recovery",
        client_id,
        connection_id = conn.id(),
        moved,
        registered,
        "Recovered session subscriptions"
    );
    Ok(registered)
}
