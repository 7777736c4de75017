//! Peer registry for the loopback relay
//!
//! This module tracks every participant connected to a relay:
//! - Identity assignment and capacity limits
//! - The event channel used to push data into each peer
//! - Replicated attributes, kept so late joiners can be brought up to date

use log::info;
use presence_shared::{SessionId, TransportEvent};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// One connected participant
#[derive(Debug)]
pub struct Peer {
    /// Identity assigned by the relay
    pub identity: SessionId,
    /// Channel feeding this peer's transport events
    pub events: UnboundedSender<TransportEvent>,
    /// Last known value of every attribute the peer has written
    pub attributes: HashMap<String, String>,
    /// When the peer connected
    pub joined_at: Instant,
    /// Position in join order
    pub join_seq: u32,
}

impl Peer {
    /// Creates a peer with no attributes.
    ///
    /// # Arguments
    /// * `identity` - Identity assigned by the relay
    /// * `events` - Sender half of the peer's event channel
    pub fn new(identity: SessionId, events: UnboundedSender<TransportEvent>) -> Self {
        Self {
            identity,
            events,
            attributes: HashMap::new(),
            joined_at: Instant::now(),
            join_seq: 0,
        }
    }

    /// Pushes `event` to this peer; returns false if its receiver is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Merges `attributes` and returns the entries whose value changed.
    pub fn merge_attributes(
        &mut self,
        attributes: HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut changed = HashMap::new();
        for (key, value) in attributes {
            if self.attributes.get(&key) != Some(&value) {
                self.attributes.insert(key.clone(), value.clone());
                changed.insert(key, value);
            }
        }
        changed
    }
}

/// All peers currently connected to one relay
#[derive(Debug)]
pub struct PeerManager {
    peers: HashMap<SessionId, Peer>,
    next_peer_id: u32,
    max_peers: usize,
}

impl PeerManager {
    /// Creates an empty registry.
    ///
    /// # Arguments
    /// * `max_peers` - Maximum number of simultaneously connected peers
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
        }
    }

    /// Registers a new peer; `None` when the relay is full.
    pub fn add_peer(&mut self, events: UnboundedSender<TransportEvent>) -> Option<SessionId> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let join_seq = self.next_peer_id;
        let identity = SessionId::new(format!("peer-{}", join_seq));
        self.next_peer_id += 1;

        info!("Peer {} joined", identity);
        let mut peer = Peer::new(identity.clone(), events);
        peer.join_seq = join_seq;
        self.peers.insert(identity.clone(), peer);
        Some(identity)
    }

    /// Removes a peer from the registry.
    ///
    /// # Returns
    /// The removed peer, or `None` if it was not connected
    pub fn remove_peer(&mut self, identity: &SessionId) -> Option<Peer> {
        let removed = self.peers.remove(identity);
        if let Some(peer) = &removed {
            info!(
                "Peer {} left after {:?}",
                peer.identity,
                peer.joined_at.elapsed()
            );
        }
        removed
    }

    /// Looks up a connected peer
    pub fn get(&self, identity: &SessionId) -> Option<&Peer> {
        self.peers.get(identity)
    }

    /// Mutable lookup, used to merge attribute writes
    pub fn get_mut(&mut self, identity: &SessionId) -> Option<&mut Peer> {
        self.peers.get_mut(identity)
    }

    /// Every peer except `exclude`
    pub fn others<'a>(&'a self, exclude: &'a SessionId) -> impl Iterator<Item = &'a Peer> + 'a {
        self.peers.values().filter(move |peer| &peer.identity != exclude)
    }

    /// Sends `event` to every peer except `exclude`.
    pub fn broadcast(&self, event: &TransportEvent, exclude: Option<&SessionId>) {
        for peer in self.peers.values() {
            if Some(&peer.identity) != exclude {
                peer.send(event.clone());
            }
        }
    }

    /// Identities ordered by join order
    pub fn identities(&self) -> Vec<SessionId> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|peer| peer.join_seq);
        peers.into_iter().map(|peer| peer.identity.clone()).collect()
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn channel() -> (
        UnboundedSender<TransportEvent>,
        UnboundedReceiver<TransportEvent>,
    ) {
        unbounded_channel()
    }

    #[test]
    fn test_peer_manager_creation() {
        let manager = PeerManager::new(5);
        assert_eq!(manager.max_peers, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_peers() {
        let mut manager = PeerManager::new(3);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let id1 = manager.add_peer(tx1).unwrap();
        let id2 = manager.add_peer(tx2).unwrap();

        assert_eq!(id1, SessionId::from("peer-1"));
        assert_eq!(id2, SessionId::from("peer-2"));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_peer_max_capacity() {
        let mut manager = PeerManager::new(1);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        assert!(manager.add_peer(tx1).is_some());
        assert!(manager.add_peer(tx2).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_peer() {
        let mut manager = PeerManager::new(2);
        let (tx, _rx) = channel();
        let id = manager.add_peer(tx).unwrap();

        assert!(manager.remove_peer(&id).is_some());
        assert!(manager.remove_peer(&id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = PeerManager::new(2);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let id1 = manager.add_peer(tx1).unwrap();
        manager.remove_peer(&id1);
        let id2 = manager.add_peer(tx2).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_merge_attributes_reports_changes_only() {
        let (tx, _rx) = channel();
        let mut peer = Peer::new(SessionId::from("p"), tx);

        let mut first = HashMap::new();
        first.insert("a".to_string(), "1".to_string());
        first.insert("b".to_string(), "2".to_string());
        assert_eq!(peer.merge_attributes(first.clone()).len(), 2);
        assert!(peer.merge_attributes(first).is_empty());

        let mut second = HashMap::new();
        second.insert("a".to_string(), "1".to_string());
        second.insert("b".to_string(), "3".to_string());
        let changed = peer.merge_attributes(second);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get("b").map(String::as_str), Some("3"));
        assert_eq!(peer.attributes.len(), 2);
    }

    #[test]
    fn test_broadcast_skips_excluded() {
        let mut manager = PeerManager::new(3);
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let id1 = manager.add_peer(tx1).unwrap();
        manager.add_peer(tx2).unwrap();

        manager.broadcast(&TransportEvent::Disconnected, Some(&id1));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), TransportEvent::Disconnected);
        assert_eq!(manager.others(&id1).count(), 1);
    }

    #[test]
    fn test_send_to_dropped_receiver() {
        let (tx, rx) = channel();
        let peer = Peer::new(SessionId::from("p"), tx);
        drop(rx);
        assert!(!peer.send(TransportEvent::Disconnected));
    }
}
