//! A known remote participant: its node id, address, and the handshake
//! difficulty it currently requires.

use std::net::SocketAddr;

use crate::id::NodeId;
use crate::message::Tuple;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub difficulty: u32,
}

impl Peer {
    pub fn new(id: NodeId, addr: SocketAddr, difficulty: u32) -> Self {
        Peer {
            id,
            addr,
            difficulty,
        }
    }

    /// A peer's id is always derived from its address, never chosen.
    pub fn from_addr(addr: SocketAddr, difficulty: u32) -> Self {
        let id = NodeId::from_ip(&addr.ip().to_string());
        Peer { id, addr, difficulty }
    }

    pub fn as_tuple(&self) -> Tuple {
        Tuple {
            addr: self.addr.to_string(),
            difficulty: self.difficulty,
        }
    }

    /// Mirrors the source's bucket-split copy: id, addr, and difficulty
    /// survive a split, nothing else (no live session key, no channel).
    pub fn split_copy(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_address() {
        let addr: SocketAddr = "10.0.0.1:4444".parse().unwrap();
        let a = Peer::from_addr(addr, 3);
        let b = Peer::from_addr(addr, 15);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn as_tuple_carries_addr_and_difficulty() {
        let addr: SocketAddr = "10.0.0.1:4444".parse().unwrap();
        let p = Peer::from_addr(addr, 3);
        let t = p.as_tuple();
        assert_eq!(t.addr, "10.0.0.1:4444");
        assert_eq!(t.difficulty, 3);
    }
}
