use std::collections::BTreeMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::metadata::{ContentHash, Descriptor};
use crate::peer::PeerEndpoint;

#[derive(Debug, Default)]
struct Entry {
    descriptor: Option<Descriptor>,
    /// Registration order, never containing the same endpoint twice.
    peers: Vec<PeerEndpoint>,
}

/// The tracker's map from content hash to metadata and known peers.
///
/// Entries are created by the first registration for a hash and are never
/// removed. Registration takes the write lock; lookups share the read lock,
/// so a lookup always observes a registration either entirely or not at all.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<BTreeMap<ContentHash, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Adds `peer` to the swarm for `hash`. Registering an endpoint twice is a
    /// no-op, and only the first metadata supplied for a hash is kept.
    pub async fn register(&self, hash: &ContentHash, peer: PeerEndpoint, meta: Option<Descriptor>) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(hash.clone()).or_default();

        if entry.descriptor.is_none() {
            entry.descriptor = meta;
        }
        if entry.peers.contains(&peer) {
            debug!("{peer} already registered for {hash}");
        } else {
            entry.peers.push(peer);
        }
    }

    /// Every known peer for `hash` except `requester`, in registration order.
    pub async fn peers_for(&self, hash: &ContentHash, requester: &PeerEndpoint) -> Vec<PeerEndpoint> {
        let entries = self.entries.read().await;
        match entries.get(hash) {
            Some(entry) => entry.peers.iter().filter(|&p| p != requester).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// One descriptor per hash that has metadata, ordered by hash.
    pub async fn list_metadata(&self) -> Vec<Descriptor> {
        let entries = self.entries.read().await;
        entries.values().filter_map(|entry| entry.descriptor.clone()).collect()
    }
}
