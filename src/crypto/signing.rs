//! Ed25519 command signing and verification against the one hard-coded
//! application signer key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{OverlayError, Result};

/// The hard-coded application signer public key. Only commands signed by
/// the matching private key are accepted into the event chain.
pub const SIGNER_PUBKEY: [u8; 32] = [
    4, 30, 248, 199, 208, 99, 69, 5, 31, 162, 148, 19, 16, 254, 113, 194, 35, 64, 152, 18, 156, 84,
    48, 56, 57, 59, 50, 81, 117, 79, 62, 57,
];

/// Load a signing key from a raw private-key file. The on-disk format is
/// the 64-byte seed||public-key layout; only the leading 32-byte seed is
/// needed to reconstruct the key.
pub fn load_signing_key(bytes: &[u8]) -> Result<SigningKey> {
    let seed: [u8; 32] = bytes
        .get(..32)
        .ok_or_else(|| {
            OverlayError::Config("private key file must hold at least 32 bytes".into())
        })?
        .try_into()
        .unwrap();
    Ok(SigningKey::from_bytes(&seed))
}

pub fn sign(key: &SigningKey, message: &[u8]) -> Signature {
    key.sign(message)
}

/// Verify a command signature against the hard-coded signer public key.
pub fn verify_command(message: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(&SIGNER_PUBKEY)
        .map_err(|e| OverlayError::Crypto(format!("bad signer pubkey: {e}")))?;
    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| OverlayError::Auth)?;
    let sig = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| OverlayError::Auth)
}

/// First 8 bytes of a signature, read big-endian, used as a cheap
/// dedupe key against the event chain's tail signature.
pub fn signature_prefix(signature: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = signature.len().min(8);
    buf[..n].copy_from_slice(&signature[..n]);
    u64::from_be_bytes(buf)
}
