//! Node identity, XOR distance, and the proof-of-work acceptance window
//! shared by k-bucket nonce mining, session establishment, and event
//! mining.

use sha1::{Digest, Sha1};
use std::fmt;

pub const ID_BYTES: usize = 20;

/// A 160-bit node identifier: `SHA1(dotted-quad IP string)`.
///
/// Every distance and ordering comparison in this protocol only ever
/// looks at the leading 64 bits of this value (see [`NodeId::prefix_u64`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; ID_BYTES]);

impl NodeId {
    pub fn from_ip(ip: &str) -> Self {
        let digest = Sha1::digest(ip.as_bytes());
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest);
        NodeId(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s).ok()?;
        if raw.len() != ID_BYTES {
            return None;
        }
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&raw);
        Some(NodeId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Big-endian u64 formed from the leading 8 bytes of the id. All
    /// distance/ordering comparisons in this protocol compare this
    /// truncated prefix, never the full 160 bits.
    pub fn prefix_u64(&self) -> u64 {
        u64::from_be_bytes(self.0[..8].try_into().unwrap())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

/// XOR distance between two ids, truncated to the leading 64 bits.
pub fn distance(a: &NodeId, b: &NodeId) -> u64 {
    a.prefix_u64() ^ b.prefix_u64()
}

/// Acceptance window `(min, max)` for the PoW scheme used throughout the
/// protocol: a candidate hash (read as a big-endian u64 over its leading
/// 8 bytes) is accepted iff `min < candidate && candidate < max`.
///
/// `length` is the hex-character length of the candidate hash, `difficulty`
/// the required number of leading repetitions. `max` is built from the
/// decimal digits of `difficulty` repeated `difficulty` times, then padded
/// with `f`; `min` uses the same prefix padded with the hex digit for
/// `difficulty + 1`. Only the leading 16 hex characters (8 bytes) of each
/// padded string are ever read back out, so values of `length` beyond that
/// have no effect on the returned bounds.
pub fn target_range(length: usize, difficulty: u32) -> (u64, u64) {
    let prefix = difficulty.to_string().repeat(difficulty as usize);
    let next_hex = format!("{:x}", difficulty + 1);

    let mut max_hex = prefix.clone();
    while max_hex.chars().count() < length {
        max_hex.push('f');
    }
    let mut min_hex = prefix;
    while min_hex.chars().count() < length {
        min_hex.push_str(&next_hex);
    }

    (hex_prefix_u64(&min_hex), hex_prefix_u64(&max_hex))
}

fn hex_prefix_u64(s: &str) -> u64 {
    let mut truncated: String = s.chars().take(16).collect();
    if truncated.len() % 2 != 0 {
        truncated.pop();
    }
    let bytes = hex::decode(&truncated).unwrap_or_default();
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(buf)
}

/// True if `candidate`'s leading 8 bytes fall strictly inside `(min, max)`.
pub fn meets_target(candidate_prefix: u64, min: u64, max: u64) -> bool {
    min < candidate_prefix && candidate_prefix < max
}

/// Mine a nonce (appended as its decimal string to `data`) such that
/// `SHA1(data || nonce)`'s leading 8 bytes fall inside `target_range(length,
/// difficulty)`. Used identically by k-bucket merkle nonces, event mining,
/// and session handshakes.
pub fn mine_nonce(data: &[u8], length: usize, difficulty: u32) -> (u64, [u8; ID_BYTES]) {
    let (min, max) = target_range(length, difficulty);
    let mut nonce: u64 = 0;
    loop {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.update(nonce.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let candidate = u64::from_be_bytes(prefix);
        if meets_target(candidate, min, max) {
            let mut out = [0u8; ID_BYTES];
            out.copy_from_slice(&digest);
            return (nonce, out);
        }
        nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_deterministic() {
        let a = NodeId::from_ip("192.168.1.1");
        let b = NodeId::from_ip("192.168.1.1");
        assert_eq!(a, b);
    }

    #[test]
    fn node_id_differs_by_ip() {
        let a = NodeId::from_ip("192.168.1.1");
        let b = NodeId::from_ip("192.168.1.2");
        assert_ne!(a, b);
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = NodeId::from_ip("10.0.0.1");
        assert_eq!(distance(&a, &a), 0);
    }

    #[test]
    fn hex_round_trip() {
        let a = NodeId::from_ip("10.0.0.1");
        let hex = a.to_hex();
        let b = NodeId::from_hex(&hex).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn target_range_orders_min_below_max() {
        let (min, max) = target_range(40, 3);
        assert!(min < max);
        assert_eq!(max >> 56, 0x33);
        assert_eq!(min >> 56, 0x33);
    }

    #[test]
    fn target_range_zero_difficulty_spans_everything() {
        let (min, max) = target_range(8, 0);
        assert!(min < max);
    }

    #[test]
    fn mine_nonce_produces_hash_in_range() {
        let (_, hash) = mine_nonce(b"some data", 40, 3);
        let (min, max) = target_range(40, 3);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        let value = u64::from_be_bytes(prefix);
        assert!(meets_target(value, min, max));
    }
}
