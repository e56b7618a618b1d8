//! Wire message shapes exchanged after a session has been established,
//! plus the handshake's own `KeyOffer` shape.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};

pub const TYPE_FIND_NODE: &str = "find node";
pub const TYPE_FOUND: &str = "found";
pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";
pub const TYPE_COMMAND: &str = "command";
pub const TYPE_BLACKLIST: &str = "blacklist";
pub const KEY_EXCHANGE_TYPE: &str = "key exchange";

/// A post-handshake application message. `data` carries whatever payload
/// the message type requires (a target id for `find node`, an encoded
/// tuple list for `found`, a [`CmdRequest`] for `command`, empty for
/// `ping`/`pong`/`blacklist`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Msg {
    pub fn new(msg_type: impl Into<String>, data: Vec<u8>) -> Self {
        Msg {
            msg_type: msg_type.into(),
            data,
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Msg::new(msg_type, Vec::new())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| OverlayError::Framing(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| OverlayError::Framing(e.to_string()))
    }
}

/// `(address, required difficulty)` — how peers are advertised in
/// `found` replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tuple {
    pub addr: String,
    pub difficulty: u32,
}

/// The handshake offer sent by the initiator, and echoed back (minus the
/// nonce) by the responder once its own proof-of-work check passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyOffer {
    #[serde(rename = "type")]
    pub offer_type: String,
    pub nonce: u64,
    pub prime: BigUint,
    pub key: BigUint,
}

/// A signed application command, carried as the `data` of a `command`
/// message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdRequest {
    pub cmd: String,
    pub signature: Vec<u8>,
}

impl CmdRequest {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| OverlayError::Framing(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| OverlayError::Framing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_json_round_trips() {
        let msg = Msg::new(TYPE_FIND_NODE, b"target-id".to_vec());
        let encoded = msg.to_json().unwrap();
        let decoded = Msg::from_json(&encoded).unwrap();
        assert_eq!(decoded.msg_type, TYPE_FIND_NODE);
        assert_eq!(decoded.data, b"target-id");
    }

    #[test]
    fn cmd_request_round_trips() {
        let req = CmdRequest {
            cmd: "hello world".into(),
            signature: vec![1, 2, 3, 4],
        };
        let encoded = req.to_json().unwrap();
        let decoded = CmdRequest::from_json(&encoded).unwrap();
        assert_eq!(decoded.cmd, "hello world");
        assert_eq!(decoded.signature, vec![1, 2, 3, 4]);
    }

    #[test]
    fn tuple_round_trips_through_json() {
        let t = Tuple {
            addr: "127.0.0.1:4444".into(),
            difficulty: 3,
        };
        let encoded = serde_json::to_vec(&t).unwrap();
        let decoded: Tuple = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, t);
    }
}
