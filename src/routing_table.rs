//! Routing table: an ordered sequence of k-buckets.
//!
//! The source threads buckets through a doubly-linked ring and walks it
//! comparing neighboring ids to find the bucket closest to a target. The
//! pointer-chasing is not observable behavior; what the protocol depends
//! on is: given a target id, find the closest bucket or peer, and grow
//! the table by splitting a full bucket in two. This keeps buckets in a
//! plain `Vec` and computes "closest" and "split" directly rather than
//! via ring traversal.

use rand::seq::SliceRandom;

use crate::error::{OverlayError, Result};
use crate::id::{self, NodeId};
use crate::kbucket::KBucket;
use crate::message::Tuple;
use crate::peer::Peer;

pub struct RoutingTable {
    buckets: Vec<KBucket>,
    pub k: usize,
}

impl RoutingTable {
    pub fn new(k: usize) -> Self {
        RoutingTable {
            buckets: Vec::new(),
            k,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn append(&mut self, bucket: KBucket) {
        self.buckets.push(bucket);
    }

    pub fn prepend(&mut self, bucket: KBucket) {
        self.buckets.insert(0, bucket);
    }

    pub fn insert(&mut self, index: usize, bucket: KBucket) {
        let index = index.min(self.buckets.len());
        self.buckets.insert(index, bucket);
    }

    pub fn add_after_node(&mut self, after_root: &NodeId, bucket: KBucket) {
        let idx = self
            .buckets
            .iter()
            .position(|b| b.root_id().as_ref() == Some(after_root))
            .map(|i| i + 1)
            .unwrap_or(self.buckets.len());
        self.insert(idx, bucket);
    }

    pub fn add_before_node(&mut self, before_root: &NodeId, bucket: KBucket) {
        let idx = self
            .buckets
            .iter()
            .position(|b| b.root_id().as_ref() == Some(before_root))
            .unwrap_or(0);
        self.insert(idx, bucket);
    }

    pub fn find_bucket(&self, root: &NodeId) -> Option<&KBucket> {
        self.buckets
            .iter()
            .find(|b| b.root_id().as_ref() == Some(root))
    }

    pub fn delete_bucket(&mut self, root: &NodeId) -> Option<KBucket> {
        let idx = self
            .buckets
            .iter()
            .position(|b| b.root_id().as_ref() == Some(root))?;
        Some(self.buckets.remove(idx))
    }

    /// The bucket whose root id is numerically nearest `target`.
    pub fn find_closest_bucket(&self, target: &NodeId) -> Option<&KBucket> {
        self.buckets
            .iter()
            .filter(|b| !b.is_empty())
            .min_by_key(|b| id::distance(&b.root_id().unwrap(), target))
    }

    pub fn find_peer(&self, id: &NodeId) -> Option<Peer> {
        self.buckets.iter().find_map(|b| b.find_node(id).cloned())
    }

    pub fn delete_by_id(&mut self, id: &NodeId) -> Option<Peer> {
        for bucket in &mut self.buckets {
            if let Some(p) = bucket.delete(id) {
                return Some(p);
            }
        }
        None
    }

    /// Closest known peer to `target` across the whole table.
    pub fn find_closest(&self, target: &NodeId) -> Option<Peer> {
        self.buckets
            .iter()
            .filter_map(|b| b.find_closest(target))
            .min_by_key(|p| id::distance(&p.id, target))
    }

    /// `a` peers closest to `target` across the whole table, nearest first.
    pub fn find_a_closest(&self, target: &NodeId, a: usize) -> Vec<Peer> {
        let mut all = self.list_peers();
        all.sort_by_key(|p| id::distance(&p.id, target));
        all.truncate(a);
        all
    }

    /// Insert `peer`, splitting its bucket if it would overflow, mirroring
    /// the source's add-or-split-and-redistribute logic.
    pub fn add_peer(&mut self, peer: Peer) -> Result<()> {
        if self.buckets.is_empty() {
            let mut bucket = KBucket::new(self.k, peer.difficulty);
            bucket.add(peer);
            self.buckets.push(bucket);
            return Ok(());
        }

        let target = peer.id;
        let bucket_idx = {
            let bucket = self
                .find_closest_bucket(&target)
                .ok_or(OverlayError::NotFound)?;
            self.buckets
                .iter()
                .position(|b| std::ptr::eq(b, bucket))
                .unwrap()
        };

        let already_known = self.buckets[bucket_idx].find_node(&target).is_some();
        if !self.buckets[bucket_idx].is_full() || already_known {
            self.buckets[bucket_idx].add(peer);
            return Ok(());
        }

        let (left, right) = self.buckets[bucket_idx].split();
        self.buckets.remove(bucket_idx);
        let left_distance = left
            .root_id()
            .map(|id| id::distance(&id, &target))
            .unwrap_or(u64::MAX);
        let right_distance = right
            .root_id()
            .map(|id| id::distance(&id, &target))
            .unwrap_or(u64::MAX);
        self.buckets.insert(bucket_idx, right);
        self.buckets.insert(bucket_idx, left);

        if left_distance <= right_distance {
            self.buckets[bucket_idx].add(peer);
        } else {
            self.buckets[bucket_idx + 1].add(peer);
        }
        Ok(())
    }

    pub fn reverse(&mut self) {
        self.buckets.reverse();
    }

    /// Drop duplicate peer ids across buckets, keeping the first
    /// occurrence in bucket order.
    pub fn remove_duplicates(&mut self) {
        let mut seen = std::collections::HashSet::new();
        for bucket in &mut self.buckets {
            let keep: Vec<Peer> = bucket
                .in_order()
                .iter()
                .filter(|p| seen.insert(p.id))
                .cloned()
                .collect();
            *bucket = KBucket::new(bucket.k, bucket.difficulty);
            for p in keep {
                bucket.add(p);
            }
        }
    }

    /// Sort buckets ascending by root id.
    pub fn sort(&mut self) {
        self.buckets.sort_by_key(|b| b.root_id());
    }

    /// True once the table holds at least one bucket; the flat `Vec`
    /// representation is always logically circular (index arithmetic
    /// wraps), unlike the source's literal doubly-linked ring.
    pub fn is_circular(&self) -> bool {
        !self.buckets.is_empty()
    }

    /// Josephus elimination over every known peer, counting off every
    /// `k`-th survivor. A non-protocol-path convenience inherited from
    /// the source.
    pub fn josephus(&self, k: usize) -> Vec<Peer> {
        let mut remaining = self.list_peers();
        let mut order = Vec::with_capacity(remaining.len());
        if remaining.is_empty() || k == 0 {
            return order;
        }
        let mut idx = 0usize;
        while !remaining.is_empty() {
            idx = (idx + k - 1) % remaining.len();
            order.push(remaining.remove(idx));
        }
        order
    }

    pub fn list(&self) -> &[KBucket] {
        &self.buckets
    }

    pub fn list_peers(&self) -> Vec<Peer> {
        self.buckets
            .iter()
            .flat_map(|b| b.in_order().iter().cloned())
            .collect()
    }

    pub fn as_tuples(&self) -> Vec<Tuple> {
        self.list_peers().iter().map(Peer::as_tuple).collect()
    }

    /// Sample `count` distinct peers uniformly at random from the whole
    /// table. Broadcast's fan-out; the corrected form of the source's
    /// peer-sampling, which looped `rand.Intn` over an accumulator that
    /// was still empty on every iteration.
    pub fn sample_peers(&self, count: usize) -> Vec<Peer> {
        let mut all = self.list_peers();
        let mut rng = rand::thread_rng();
        all.shuffle(&mut rng);
        all.truncate(count);
        all
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
    fn add_peer_creates_first_bucket() {
        let mut table = RoutingTable::new(20);
        table.add_peer(peer("10.0.0.1")).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.list_peers().len(), 1);
    }

    #[test]
    fn add_peer_splits_full_bucket() {
        let mut table = RoutingTable::new(2);
        for i in 1..=5u8 {
            table.add_peer(peer(&format!("10.0.0.{i}"))).unwrap();
        }
        assert!(table.len() >= 2);
        assert_eq!(table.list_peers().len(), 5);
    }

    #[test]
    fn find_peer_locates_known_id() {
        let mut table = RoutingTable::new(20);
        let p = peer("10.0.0.9");
        table.add_peer(p.clone()).unwrap();
        assert_eq!(table.find_peer(&p.id), Some(p));
    }

    #[test]
    fn find_peer_misses_unknown_id() {
        let mut table = RoutingTable::new(20);
        table.add_peer(peer("10.0.0.1")).unwrap();
        let unknown = peer("10.0.0.2").id;
        assert_eq!(table.find_peer(&unknown), None);
    }

    #[test]
    fn sample_peers_never_exceeds_table_size() {
        let mut table = RoutingTable::new(20);
        table.add_peer(peer("10.0.0.1")).unwrap();
        table.add_peer(peer("10.0.0.2")).unwrap();
        let sampled = table.sample_peers(10);
        assert_eq!(sampled.len(), 2);
    }

    #[test]
    fn remove_duplicates_keeps_one_copy_per_id() {
        let mut table = RoutingTable::new(20);
        table.add_peer(peer("10.0.0.1")).unwrap();
        table.append({
            let mut b = KBucket::new(20, 3);
            b.add(peer("10.0.0.1"));
            b
        });
        table.remove_duplicates();
        let ids: Vec<_> = table.list_peers().iter().map(|p| p.id).collect();
        let unique: std::collections::HashSet<_> = ids.iter().cloned().collect();
        assert_eq!(ids.len(), unique.len());
    }
}
