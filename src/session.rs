//! One-round-trip Diffie-Hellman session establishment gated by a
//! proof-of-work puzzle.
//!
//! Every send re-does this handshake from scratch: there is no session
//! reuse across messages. The responder's proof-of-work check hashes its
//! OWN node id, not the initiator's — a real quirk of the protocol this
//! is modeled on, preserved deliberately rather than "fixed", since
//! fixing it silently would break wire compatibility with any other
//! implementation speaking the same protocol version.

use std::net::SocketAddr;
use std::time::Duration;

use num_bigint::BigUint;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::warn;

use crate::crypto::dh;
use crate::error::{OverlayError, Result};
use crate::framing;
use crate::id::{self, NodeId};
use crate::message::{KeyOffer, KEY_EXCHANGE_TYPE};

/// Deadline for the full send-then-receive round trip of an outbound
/// handshake. The source blocks indefinitely; this is an explicit
/// strengthening so a silently-dropped offer can't wedge the caller.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Perform the initiator side of a handshake against `peer_addr`,
/// returning the derived AES-256 session key.
///
/// `peer_difficulty` is the proof-of-work difficulty this peer is known
/// (or assumed, for peers not yet seen) to require. Per the preserved
/// protocol quirk (see module docs and [`accept_inbound`]), the responder
/// verifies the nonce against its OWN id, so the nonce mined here must be
/// keyed to the remote peer's id — derived from `peer_addr` — not the
/// initiator's own id.
pub async fn establish_outbound(
    socket: &UdpSocket,
    peer_addr: SocketAddr,
    peer_difficulty: u32,
) -> Result<[u8; 32]> {
    let prime = dh::generate_prime(dh::PRIME_BITS);
    let keypair = dh::generate_keypair(&prime);

    let remote_id = NodeId::from_ip(&peer_addr.ip().to_string());
    let (nonce, _) = id::mine_nonce(remote_id.to_hex().as_bytes(), 40, peer_difficulty);

    let offer = KeyOffer {
        offer_type: KEY_EXCHANGE_TYPE.to_string(),
        nonce,
        prime: prime.clone(),
        key: keypair.public.clone(),
    };

    let frame = framing::encode_handshake(&offer)?;
    timeout(
        HANDSHAKE_TIMEOUT,
        framing::send_framed(socket, peer_addr, &frame),
    )
    .await
    .map_err(|_| OverlayError::Handshake("offer send timed out".into()))??;

    let (reply_bytes, from) = timeout(HANDSHAKE_TIMEOUT, framing::recv_framed(socket))
        .await
        .map_err(|_| OverlayError::Handshake("no reply to key offer".into()))??;
    if from != peer_addr {
        return Err(OverlayError::Handshake(
            "handshake reply from unexpected address".into(),
        ));
    }

    let reply: KeyOffer = framing::decode_handshake(&reply_bytes)?;
    Ok(dh::shared_secret(&prime, &keypair.private, &reply.key))
}

/// Outcome of processing an inbound [`KeyOffer`]: either a validated
/// session key and the reply to send back, or a silent drop.
pub enum HandshakeOutcome {
    Accepted {
        session_key: [u8; 32],
        reply: KeyOffer,
    },
    Rejected,
}

/// Validate an inbound handshake offer and, if its proof-of-work checks
/// out, derive a session key and build the reply to send.
///
/// Per the preserved protocol quirk, the proof-of-work check hashes
/// `local_id`, not the sender's id — so an offer can only ever be
/// accepted if its nonce happens to satisfy a puzzle keyed to the
/// *responder's* own identity.
pub fn accept_inbound(offer: &KeyOffer, local_id: &NodeId, local_difficulty: u32) -> HandshakeOutcome {
    if offer.offer_type != KEY_EXCHANGE_TYPE || offer.prime.bits() != dh::PRIME_BITS {
        return HandshakeOutcome::Rejected;
    }

    let (min, max) = id::target_range(40, local_difficulty);
    let candidate = hash_own_id_with_nonce(local_id, offer.nonce);
    if !id::meets_target(candidate, min, max) {
        return HandshakeOutcome::Rejected;
    }

    let keypair = dh::generate_keypair(&offer.prime);
    let session_key = dh::shared_secret(&offer.prime, &keypair.private, &offer.key);
    let reply = KeyOffer {
        offer_type: String::new(),
        nonce: 0,
        prime: offer.prime.clone(),
        key: keypair.public,
    };
    HandshakeOutcome::Accepted { session_key, reply }
}

fn hash_own_id_with_nonce(local_id: &NodeId, nonce: u64) -> u64 {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(local_id.to_hex().as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Send `reply` back to `from` as the handshake's closing frame.
pub async fn send_reply(socket: &UdpSocket, from: SocketAddr, reply: &KeyOffer) -> Result<()> {
    let frame = framing::encode_handshake(reply)?;
    framing::send_framed(socket, from, &frame).await
}

pub fn warn_rejected(from: SocketAddr) {
    warn!(%from, "handshake rejected: proof-of-work check failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_prime() -> BigUint {
        // A real 2048-bit prime is too slow to regenerate per test case;
        // accept_inbound's prime-bit check is exercised separately with
        // a deliberately wrong-size prime below.
        dh::generate_prime(256)
    }

    #[test]
    fn rejects_non_key_exchange_type() {
        let prime = test_prime();
        let offer = KeyOffer {
            offer_type: "something else".into(),
            nonce: 0,
            prime,
            key: BigUint::from(2u32),
        };
        let id = NodeId::from_ip("10.0.0.1");
        assert!(matches!(
            accept_inbound(&offer, &id, 3),
            HandshakeOutcome::Rejected
        ));
    }

    #[test]
    fn rejects_wrong_prime_bit_length() {
        let prime = test_prime();
        let offer = KeyOffer {
            offer_type: KEY_EXCHANGE_TYPE.into(),
            nonce: 0,
            prime,
            key: BigUint::from(2u32),
        };
        let id = NodeId::from_ip("10.0.0.1");
        assert!(matches!(
            accept_inbound(&offer, &id, 3),
            HandshakeOutcome::Rejected
        ));
    }

    #[test]
    fn accepts_nonce_mined_against_own_id() {
        let prime = dh::generate_prime(dh::PRIME_BITS);
        let id = NodeId::from_ip("10.0.0.1");
        let difficulty = 1; // keep mining fast for the test
        let (nonce, _) = id::mine_nonce(id.to_hex().as_bytes(), 40, difficulty);

        let offer = KeyOffer {
            offer_type: KEY_EXCHANGE_TYPE.into(),
            nonce,
            prime,
            key: BigUint::from(2u32),
        };
        match accept_inbound(&offer, &id, difficulty) {
            HandshakeOutcome::Accepted { .. } => {}
            HandshakeOutcome::Rejected => panic!("expected acceptance"),
        }
    }
}
