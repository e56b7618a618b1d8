//! K-bucket: a capacity-bounded container of peers, ordered by node id.
//!
//! The source stores peers in a hand-rolled binary search tree with a
//! "duplicates go right" insertion rule and two different navigation
//! disciplines (string compare for insertion, numeric XOR-prefix compare
//! for lookup/delete). The tree shape is not itself observable behavior;
//! what matters is that insertion never rejects an existing id, that
//! lookup and distance-ranking go by the numeric id prefix, and that the
//! bucket exposes ordered traversal plus a merkle root over its
//! contents. This realizes all of that over a flat, sorted `Vec<Peer>`.

use rand::seq::SliceRandom;
use sha1::{Digest, Sha1};

use crate::id::{self, NodeId};
use crate::message::Tuple;
use crate::peer::Peer;

#[derive(Debug, Clone)]
pub struct KBucket {
    peers: Vec<Peer>,
    pub k: usize,
    pub difficulty: u32,
}

impl KBucket {
    pub fn new(k: usize, difficulty: u32) -> Self {
        KBucket {
            peers: Vec::new(),
            k,
            difficulty,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.k
    }

    /// Insert `peer`, replacing any existing entry with the same id. The
    /// source's BST sends exact-id duplicates to the right child rather
    /// than rejecting them; the observable effect — add never fails on a
    /// duplicate id — is preserved here by upsert.
    pub fn add(&mut self, peer: Peer) {
        match self.peers.iter().position(|p| p.id == peer.id) {
            Some(idx) => self.peers[idx] = peer,
            None => {
                let pos = self.peers.partition_point(|p| p.id < peer.id);
                self.peers.insert(pos, peer);
            }
        }
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.id == id)
    }

    pub fn delete(&mut self, id: &NodeId) -> Option<Peer> {
        let idx = self.peers.iter().position(|p| &p.id == id)?;
        Some(self.peers.remove(idx))
    }

    /// The contained peer numerically closest to `target` by XOR distance.
    pub fn find_closest(&self, target: &NodeId) -> Option<Peer> {
        self.peers
            .iter()
            .min_by_key(|p| id::distance(&p.id, target))
            .cloned()
    }

    /// The `a` closest peers to `target`, nearest first.
    pub fn find_a_closest(&self, target: &NodeId, a: usize) -> Vec<Peer> {
        let mut sorted: Vec<Peer> = self.peers.clone();
        sorted.sort_by_key(|p| id::distance(&p.id, target));
        sorted.truncate(a);
        sorted
    }

    /// Ascending-by-id traversal. Pre/post-order are aliases: a flat
    /// ordered container has no distinct tree shapes left to traverse.
    pub fn in_order(&self) -> &[Peer] {
        &self.peers
    }
    pub fn pre_order(&self) -> &[Peer] {
        &self.peers
    }
    pub fn post_order(&self) -> &[Peer] {
        &self.peers
    }

    pub fn min(&self) -> Option<&Peer> {
        self.peers.first()
    }

    pub fn max(&self) -> Option<&Peer> {
        self.peers.last()
    }

    /// The bucket's representative id for bucket-to-bucket navigation —
    /// the smallest contained id, standing in for the source's BST root.
    pub fn root_id(&self) -> Option<NodeId> {
        self.peers.first().map(|p| p.id)
    }

    /// Split into two buckets at the midpoint of ascending id order, each
    /// half reshuffled, matching the source's split-then-shuffle rebuild.
    pub fn split(&self) -> (KBucket, KBucket) {
        let mid = self.peers.len() / 2;
        let (low, high) = self.peers.split_at(mid);
        let mut low: Vec<Peer> = low.iter().map(Peer::split_copy).collect();
        let mut high: Vec<Peer> = high.iter().map(Peer::split_copy).collect();
        let mut rng = rand::thread_rng();
        low.shuffle(&mut rng);
        high.shuffle(&mut rng);

        let mut left = KBucket::new(self.k, self.difficulty);
        for p in low {
            left.add(p);
        }
        let mut right = KBucket::new(self.k, self.difficulty);
        for p in high {
            right.add(p);
        }
        (left, right)
    }

    /// Pairwise SHA-1 up the ascending id list, duplicating the last
    /// element when a level has odd length.
    pub fn merkle_root(&self) -> [u8; 20] {
        let mut level: Vec<[u8; 20]> = self.peers.iter().map(|p| *p.id.as_bytes()).collect();
        if level.is_empty() {
            return [0u8; 20];
        }
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                level.push(*level.last().unwrap());
            }
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let mut hasher = Sha1::new();
                hasher.update(hex::encode(pair[0]));
                hasher.update(hex::encode(pair[1]));
                let digest = hasher.finalize();
                let mut out = [0u8; 20];
                out.copy_from_slice(&digest);
                next.push(out);
            }
            level = next;
        }
        level[0]
    }

    /// Proof-of-work nonce over this bucket's merkle root.
    pub fn calculate_nonce(&self) -> (u64, [u8; 20]) {
        let root = self.merkle_root();
        id::mine_nonce(hex::encode(root).as_bytes(), 40, self.difficulty)
    }

    pub fn as_tuples(&self) -> Vec<Tuple> {
        self.peers.iter().map(Peer::as_tuple).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(ip: &str) -> Peer {
        let addr: SocketAddr = format!("{ip}:4444").parse().unwrap();
        Peer::from_addr(addr, 3)
    }

    #[test]
    fn add_is_idempotent_on_duplicate_ids() {
        let mut bucket = KBucket::new(20, 3);
        bucket.add(peer("10.0.0.1"));
        bucket.add(peer("10.0.0.1"));
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn find_node_locates_exact_id() {
        let mut bucket = KBucket::new(20, 3);
        let p = peer("10.0.0.2");
        bucket.add(p.clone());
        assert_eq!(bucket.find_node(&p.id), Some(&p));
    }

    #[test]
    fn delete_removes_peer() {
        let mut bucket = KBucket::new(20, 3);
        let p = peer("10.0.0.3");
        bucket.add(p.clone());
        assert_eq!(bucket.delete(&p.id), Some(p.clone()));
        assert!(bucket.find_node(&p.id).is_none());
    }

    #[test]
    fn find_a_closest_orders_by_distance() {
        let mut bucket = KBucket::new(20, 3);
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"] {
            bucket.add(peer(ip));
        }
        let target = peer("10.0.0.2").id;
        let closest = bucket.find_a_closest(&target, 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].id, target);
    }

    #[test]
    fn split_preserves_all_peers_across_halves() {
        let mut bucket = KBucket::new(4, 3);
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"] {
            bucket.add(peer(ip));
        }
        let (left, right) = bucket.split();
        assert_eq!(left.len() + right.len(), 4);
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let mut bucket = KBucket::new(20, 3);
        bucket.add(peer("10.0.0.1"));
        bucket.add(peer("10.0.0.2"));
        assert_eq!(bucket.merkle_root(), bucket.merkle_root());
    }

    #[test]
    fn calculate_nonce_satisfies_target_range() {
        let mut bucket = KBucket::new(20, 1);
        bucket.add(peer("10.0.0.1"));
        let (_, hash) = bucket.calculate_nonce();
        let (min, max) = crate::id::target_range(40, bucket.difficulty);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        let value = u64::from_be_bytes(prefix);
        assert!(crate::id::meets_target(value, min, max));
    }
}
