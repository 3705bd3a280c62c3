//! In-memory subscription index
//!
//! Four maps from topic filter to subscriber set, split by exact vs wildcard
//! filters and by whether the client is connected:
//!
//! | map | filters | clients |
//! |-----|---------|---------|
//! | `subs` | exact | online |
//! | `wild_subs` | wildcard | online |
//! | `offline_subs` | exact | offline |
//! | `offline_wild_subs` | wildcard | offline |
//!
//! Built from disk once at load and kept in step by subscribe/unsubscribe.
//! DashMap shards the filter space; each subscriber set is an FxHashMap from
//! client id to granted QoS.

use dashmap::DashMap;
use mqsession_core::{is_wildcard, topic_matches, Qos};
use rustc_hash::FxHashMap;

type Subscribers = FxHashMap<String, Qos>;
type FilterMap = DashMap<String, Subscribers>;

/// Whether a subscriber is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Client has a live connection
    Online,
    /// Client is disconnected; messages are queued
    Offline,
}

/// One match returned by [`SubscriptionIndex::subscribers`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// Subscribed client
    pub client_id: String,
    /// Filter that matched
    pub topic_filter: String,
    /// Granted QoS
    pub qos: Qos,
    /// Connection state
    pub presence: Presence,
}

/// Number of distinct filters in each map
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexCounts {
    /// Exact filters with online subscribers
    pub exact: usize,
    /// Wildcard filters with online subscribers
    pub wildcard: usize,
    /// Exact filters with offline subscribers
    pub offline_exact: usize,
    /// Wildcard filters with offline subscribers
    pub offline_wildcard: usize,
}

/// Process-wide subscription index
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    subs: FilterMap,
    wild_subs: FilterMap,
    offline_subs: FilterMap,
    offline_wild_subs: FilterMap,
}

impl SubscriptionIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, presence: Presence, wildcard: bool) -> &FilterMap {
        match (presence, wildcard) {
            (Presence::Online, false) => &self.subs,
            (Presence::Online, true) => &self.wild_subs,
            (Presence::Offline, false) => &self.offline_subs,
            (Presence::Offline, true) => &self.offline_wild_subs,
        }
    }

    /// Record that `client_id` subscribes to `topic_filter`.
    ///
    /// Re-registering updates the QoS. A client is never in both the online
    /// and the offline set of the same filter.
    pub fn register(&self, client_id: &str, topic_filter: &str, qos: Qos, presence: Presence) {
        let wildcard = is_wildcard(topic_filter);
        let other = match presence {
            Presence::Online => Presence::Offline,
            Presence::Offline => Presence::Online,
        };
        remove_from(self.map(other, wildcard), client_id, topic_filter);
        self.map(presence, wildcard)
            .entry(topic_filter.to_string())
            .or_default()
            .insert(client_id.to_string(), qos);
    }

    /// Forget one subscription; returns whether it was indexed.
    pub fn unregister(&self, client_id: &str, topic_filter: &str) -> bool {
        let wildcard = is_wildcard(topic_filter);
        let online = remove_from(self.map(Presence::Online, wildcard), client_id, topic_filter);
        let offline = remove_from(self.map(Presence::Offline, wildcard), client_id, topic_filter);
        online || offline
    }

    /// Move all of a client's subscriptions to the online maps.
    ///
    /// Returns how many moved.
    pub fn move_offline_to_online(&self, client_id: &str) -> usize {
        move_client(&self.offline_subs, &self.subs, client_id)
            + move_client(&self.offline_wild_subs, &self.wild_subs, client_id)
    }

    /// Move all of a client's subscriptions to the offline maps.
    ///
    /// Returns how many moved.
    pub fn move_online_to_offline(&self, client_id: &str) -> usize {
        move_client(&self.subs, &self.offline_subs, client_id)
            + move_client(&self.wild_subs, &self.offline_wild_subs, client_id)
    }

    /// Drop every subscription of a client; returns how many were removed.
    pub fn remove_client(&self, client_id: &str) -> usize {
        [
            &self.subs,
            &self.wild_subs,
            &self.offline_subs,
            &self.offline_wild_subs,
        ]
        .into_iter()
        .map(|map| take_client(map, client_id).len())
        .sum()
    }

    /// Everyone subscribed to a filter that selects `topic_name`, online and
    /// offline, sorted by client id then filter.
    pub fn subscribers(&self, topic_name: &str) -> Vec<Subscriber> {
        let mut out = Vec::new();
        for presence in [Presence::Online, Presence::Offline] {
            if let Some(set) = self.map(presence, false).get(topic_name) {
                collect(&mut out, topic_name, set.value(), presence);
            }
            for entry in self.map(presence, true).iter() {
                if topic_matches(topic_name, entry.key()) {
                    collect(&mut out, entry.key(), entry.value(), presence);
                }
            }
        }
        out.sort_by(|a, b| {
            (&a.client_id, &a.topic_filter).cmp(&(&b.client_id, &b.topic_filter))
        });
        out
    }

    /// Whether the client is indexed under `topic_filter` with the given presence
    pub fn contains(&self, client_id: &str, topic_filter: &str, presence: Presence) -> bool {
        self.map(presence, is_wildcard(topic_filter))
            .get(topic_filter)
            .map_or(false, |set| set.contains_key(client_id))
    }

    /// Filters per map
    pub fn counts(&self) -> IndexCounts {
        IndexCounts {
            exact: self.subs.len(),
            wildcard: self.wild_subs.len(),
            offline_exact: self.offline_subs.len(),
            offline_wildcard: self.offline_wild_subs.len(),
        }
    }
}

fn collect(out: &mut Vec<Subscriber>, filter: &str, set: &Subscribers, presence: Presence) {
    out.extend(set.iter().map(|(client_id, qos)| Subscriber {
        client_id: client_id.clone(),
        topic_filter: filter.to_string(),
        qos: *qos,
        presence,
    }));
}

fn remove_from(map: &FilterMap, client_id: &str, topic_filter: &str) -> bool {
    let removed = map
        .get_mut(topic_filter)
        .map_or(false, |mut set| set.remove(client_id).is_some());
    if removed {
        map.remove_if(topic_filter, |_, set| set.is_empty());
    }
    removed
}

fn take_client(map: &FilterMap, client_id: &str) -> Vec<(String, Qos)> {
    let mut taken = Vec::new();
    for mut entry in map.iter_mut() {
        if let Some(qos) = entry.value_mut().remove(client_id) {
            taken.push((entry.key().clone(), qos));
        }
    }
    if !taken.is_empty() {
        map.retain(|_, set| !set.is_empty());
    }
    taken
}

fn move_client(from: &FilterMap, to: &FilterMap, client_id: &str) -> usize {
    let taken = take_client(from, client_id);
    let moved = taken.len();
    for (filter, qos) in taken {
        to.entry(filter)
            .or_default()
            .insert(client_id.to_string(), qos);
    }
    moved
}
