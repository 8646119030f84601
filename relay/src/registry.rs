//! Peer registration and the authoritative position store
//!
//! This module is the relay's single source of truth for "who is connected"
//! and "who is where". Both tables live in one structure so that a single
//! lock covers every mutation, which keeps two invariants cheap to enforce:
//! - a peer id appears at most once
//! - a stored position always belongs to a currently registered peer
//!
//! Readers that need to enumerate peers (broadcast fan-out, snapshot
//! assembly) take point-in-time copies and release the lock before any I/O.

use log::info;
use shared::Position;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A registered detector connection.
///
/// Identity is ephemeral: the id exists only for the lifetime of the
/// registration and is never reused within a relay process.
#[derive(Debug)]
pub struct Peer {
    /// Unique peer identifier assigned by the relay
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// True when no packet has arrived from this peer within `timeout`,
    /// indicating a likely silent disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Connection registry and position store, mutated only by the relay's
/// owning event loop.
pub struct Registry {
    /// Registered peers indexed by their unique id
    peers: HashMap<u32, Peer>,
    /// Last known position per peer. A key here is always present in
    /// `peers`; a peer that has not reported yet has no entry.
    positions: HashMap<u32, Position>,
    /// Next available peer id for new registrations
    next_peer_id: u32,
    /// Maximum number of concurrent peers allowed
    max_peers: usize,
}

impl Registry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            positions: HashMap::new(),
            next_peer_id: 1,
            max_peers,
        }
    }

    /// Registers a new peer, returning its id, or None at capacity.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        info!("Peer {} connected from {}", peer_id, addr);
        self.peers.insert(peer_id, Peer::new(peer_id, addr));

        Some(peer_id)
    }

    /// Removes a peer and its stored position. Idempotent: removing an
    /// already-gone peer returns false and changes nothing.
    pub fn remove_peer(&mut self, peer_id: &u32) -> bool {
        self.positions.remove(peer_id);
        if let Some(peer) = self.peers.remove(peer_id) {
            info!("Peer {} disconnected", peer.id);
            true
        } else {
            false
        }
    }

    /// Associates incoming datagrams with an existing registration.
    pub fn find_peer_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.peers
            .iter()
            .find(|(_, peer)| peer.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Refreshes the liveness timestamp for a peer.
    pub fn touch(&mut self, peer_id: u32) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Upserts a peer's position. Returns false for unregistered ids so the
    /// caller can drop updates from strangers.
    pub fn update_position(&mut self, peer_id: u32, pos: Position) -> bool {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = Instant::now();
            self.positions.insert(peer_id, pos);
            true
        } else {
            false
        }
    }

    /// Point-in-time copy of the full position store, suitable for a
    /// snapshot broadcast assembled outside the lock.
    pub fn snapshot(&self) -> HashMap<u32, Position> {
        self.positions.clone()
    }

    /// Point-in-time copy of peer ids and addresses for broadcast fan-out.
    /// Iterating this copy tolerates concurrent removals: a datagram to a
    /// just-departed peer is harmlessly dropped by UDP.
    pub fn peer_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.peers
            .iter()
            .map(|(id, peer)| (*id, peer.addr))
            .collect()
    }

    /// Removes peers that have been silent past `timeout`, returning their
    /// ids so the event loop can broadcast the pruned snapshot.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for peer_id in &timed_out {
            self.remove_peer(peer_id);
        }

        timed_out
    }

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
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_peer_creation() {
        let addr = test_addr();
        let peer = Peer::new(1, addr);

        assert_eq!(peer.id, 1);
        assert_eq!(peer.addr, addr);
    }

    #[test]
    fn test_peer_timeout() {
        let addr = test_addr();
        let mut peer = Peer::new(1, addr);

        assert!(!peer.is_timed_out(Duration::from_secs(1)));

        peer.last_seen = Instant::now() - Duration::from_secs(2);

        assert!(peer.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_peer() {
        let mut registry = Registry::new(2);

        let peer_id = registry.add_peer(test_addr()).unwrap();
        assert_eq!(peer_id, 1);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_peer_ids_are_unique() {
        let mut registry = Registry::new(3);

        let id1 = registry.add_peer(test_addr()).unwrap();
        let id2 = registry.add_peer(test_addr2()).unwrap();
        assert_ne!(id1, id2);

        // Ids are not reused after removal
        registry.remove_peer(&id1);
        let id3 = registry.add_peer(test_addr()).unwrap();
        assert_ne!(id3, id1);
        assert_ne!(id3, id2);
    }

    #[test]
    fn test_add_peer_max_capacity() {
        let mut registry = Registry::new(1);

        assert!(registry.add_peer(test_addr()).is_some());
        assert!(registry.add_peer(test_addr2()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_peer_is_idempotent() {
        let mut registry = Registry::new(2);

        let peer_id = registry.add_peer(test_addr()).unwrap();
        assert!(registry.remove_peer(&peer_id));
        assert!(!registry.remove_peer(&peer_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_peer_by_addr() {
        let mut registry = Registry::new(2);

        let peer_id = registry.add_peer(test_addr()).unwrap();
        registry.add_peer(test_addr2()).unwrap();

        assert_eq!(registry.find_peer_by_addr(test_addr()), Some(peer_id));

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(registry.find_peer_by_addr(unknown), None);
    }

    #[test]
    fn test_update_position_requires_registration() {
        let mut registry = Registry::new(2);

        assert!(!registry.update_position(999, Position::new(1.0, 2.0)));
        assert!(registry.snapshot().is_empty());

        let peer_id = registry.add_peer(test_addr()).unwrap();
        assert!(registry.update_position(peer_id, Position::new(1.0, 2.0)));
        assert_eq!(
            registry.snapshot().get(&peer_id),
            Some(&Position::new(1.0, 2.0))
        );
    }

    #[test]
    fn test_snapshot_keeps_latest_position_per_peer() {
        let mut registry = Registry::new(2);
        let peer_id = registry.add_peer(test_addr()).unwrap();

        registry.update_position(peer_id, Position::new(1.0, 1.0));
        registry.update_position(peer_id, Position::new(5.0, 7.0));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&peer_id), Some(&Position::new(5.0, 7.0)));
    }

    #[test]
    fn test_remove_peer_prunes_position() {
        let mut registry = Registry::new(2);
        let peer_id = registry.add_peer(test_addr()).unwrap();
        registry.update_position(peer_id, Position::new(3.0, 4.0));

        registry.remove_peer(&peer_id);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_check_timeouts_prunes_silent_peers() {
        let mut registry = Registry::new(3);
        let quiet = registry.add_peer(test_addr()).unwrap();
        let active = registry.add_peer(test_addr2()).unwrap();
        registry.update_position(quiet, Position::new(1.0, 1.0));

        registry
            .peers
            .get_mut(&quiet)
            .unwrap()
            .last_seen = Instant::now() - Duration::from_secs(30);

        let removed = registry.check_timeouts(Duration::from_secs(10));
        assert_eq!(removed, vec![quiet]);
        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot().get(&quiet).is_none());
        assert!(registry.peers.contains_key(&active));
    }

    #[test]
    fn test_peer_addrs_snapshot() {
        let mut registry = Registry::new(2);
        let id1 = registry.add_peer(test_addr()).unwrap();
        let id2 = registry.add_peer(test_addr2()).unwrap();

        let mut addrs = registry.peer_addrs();
        addrs.sort_by_key(|(id, _)| *id);

        assert_eq!(addrs, vec![(id1, test_addr()), (id2, test_addr2())]);
    }
}
