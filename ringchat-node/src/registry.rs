use std::sync::{Arc, Mutex};

use ringchat_core::{NodeId, Relation};

use crate::peer::Peer;

/// The set of active peer connections.
///
/// Peers are added once, at accept/dial time, regardless of their relation
/// at that moment (which starts out `None` and is assigned later by the
/// `connect` handshake) and removed exactly once, by `handle_disconnect`.
/// Lookups filter the live set by relation rather than maintaining separate
/// indices, since the set rarely holds more than a handful of entries.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<Vec<Arc<Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry::default()
    }

    pub fn add(&self, peer: Arc<Peer>) {
        self.peers.lock().unwrap().push(peer);
    }

    /// Removes a peer by identity (pointer equality), not by id: a peer's id
    /// may still be `NodeId::ZERO` if it disconnects before completing its
    /// handshake.
    pub fn remove(&self, peer: &Arc<Peer>) {
        let mut guard = self.peers.lock().unwrap();
        guard.retain(|p| !Arc::ptr_eq(p, peer));
    }

    pub fn by_relation(&self, relation: Relation) -> Option<Arc<Peer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.relation() == relation)
            .cloned()
    }

    pub fn by_relation_excluding(&self, relation: Relation, excluding: NodeId) -> Option<Arc<Peer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.relation() == relation && p.id() != excluding)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
