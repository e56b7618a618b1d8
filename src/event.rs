//! Signed, locally-mined, hash-linked events: the gossiped command
//! history each node keeps.

use crate::crypto::signing;
use crate::id;

const CHAIN_HASH_HEX_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct Event {
    pub data: String,
    pub signature: Vec<u8>,
    pub hash: String,
    pub prev_hash: String,
    pub nonce: u64,
}

/// A forward-only chain of events: each new event is mined against the
/// current tail and appended, never inserted or reordered.
pub struct EventChain {
    events: Vec<Event>,
    pub difficulty: u32,
}

impl EventChain {
    pub fn new(difficulty: u32) -> Self {
        EventChain {
            events: Vec::new(),
            difficulty,
        }
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Mine and append a new event carrying `data`/`signature`, chaining
    /// it to the current tail's hash (or the `"0"*40` genesis hash for
    /// the first event in the chain).
    pub fn append(&mut self, data: String, signature: Vec<u8>) -> Event {
        let prev_hash = self
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| "0".repeat(CHAIN_HASH_HEX_LEN));

        let mut hash_input = Vec::with_capacity(data.len() + signature.len() + prev_hash.len());
        hash_input.extend_from_slice(data.as_bytes());
        hash_input.extend_from_slice(&signature);
        hash_input.extend_from_slice(prev_hash.as_bytes());

        let (nonce, hash_bytes) = id::mine_nonce(&hash_input, CHAIN_HASH_HEX_LEN, self.difficulty);
        let event = Event {
            data,
            signature,
            hash: hex::encode(hash_bytes),
            prev_hash,
            nonce,
        };
        self.events.push(event.clone());
        event
    }

    /// True if `signature` differs from the tail event's signature in
    /// its leading 8 bytes — the source's (intentionally imperfect)
    /// rebroadcast-suppression check. An empty chain accepts anything.
    pub fn is_fresh(&self, signature: &[u8]) -> bool {
        match self.last() {
            None => true,
            Some(tail) => {
                signing::signature_prefix(&tail.signature) != signing::signature_prefix(signature)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_chains_to_genesis_hash() {
        let mut chain = EventChain::new(1);
        let event = chain.append("hello".into(), vec![1, 2, 3]);
        assert_eq!(event.prev_hash, "0".repeat(40));
    }

    #[test]
    fn second_event_chains_to_first() {
        let mut chain = EventChain::new(1);
        let first = chain.append("one".into(), vec![1]);
        let second = chain.append("two".into(), vec![2]);
        assert_eq!(second.prev_hash, first.hash);
    }

    #[test]
    fn mined_hash_satisfies_target_range() {
        let mut chain = EventChain::new(1);
        let event = chain.append("data".into(), vec![9, 9]);
        let bytes = hex::decode(&event.hash).unwrap();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[..8]);
        let value = u64::from_be_bytes(prefix);
        let (min, max) = id::target_range(40, chain.difficulty);
        assert!(id::meets_target(value, min, max));
    }

    #[test]
    fn is_fresh_detects_repeated_signature_prefix() {
        let mut chain = EventChain::new(1);
        chain.append("cmd".into(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!chain.is_fresh(&[1, 2, 3, 4, 5, 6, 7, 8, 9]));
        assert!(chain.is_fresh(&[9, 9, 9, 9, 9, 9, 9, 9]));
    }

    #[test]
    fn empty_chain_accepts_any_signature() {
        let chain = EventChain::new(1);
        assert!(chain.is_fresh(&[0, 0, 0, 0, 0, 0, 0, 0]));
    }
}
