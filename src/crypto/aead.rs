//! AES-256-GCM wire codec.
//!
//! Frame layout, matching the source byte-for-byte: 5 random junk bytes,
//! a 12-byte GCM nonce, then ciphertext+tag, the whole thing base64
//! encoded. The junk bytes carry no meaning; they exist only in the wire
//! format and are skipped on decode.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;

use crate::error::{OverlayError, Result};

const JUNK_LEN: usize = 5;
const NONCE_LEN: usize = 12;

pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| OverlayError::Crypto(format!("encrypt: {e}")))?;

    let mut junk = [0u8; JUNK_LEN];
    rand::thread_rng().fill_bytes(&mut junk);

    let mut framed = Vec::with_capacity(JUNK_LEN + NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(&junk);
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(framed))
}

pub fn decrypt(encoded: &str, key: &[u8; 32]) -> Result<Vec<u8>> {
    let framed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| OverlayError::Crypto(format!("base64: {e}")))?;
    if framed.len() < JUNK_LEN + NONCE_LEN {
        return Err(OverlayError::Crypto("ciphertext too short".into()));
    }

    let nonce = Nonce::from_slice(&framed[JUNK_LEN..JUNK_LEN + NONCE_LEN]);
    let ciphertext = &framed[JUNK_LEN + NONCE_LEN..];

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| OverlayError::Crypto("gcm open failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [7u8; 32];
        let msg = b"find node 0123456789abcdef0123456789abcdef01234567";
        let framed = encrypt(msg, &key).unwrap();
        let decoded = decrypt(&framed, &key).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn wrong_key_fails() {
        let key = [1u8; 32];
        let other = [2u8; 32];
        let framed = encrypt(b"hello", &key).unwrap();
        assert!(decrypt(&framed, &other).is_err());
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let key = [9u8; 32];
        let a = encrypt(b"same plaintext", &key).unwrap();
        let b = encrypt(b"same plaintext", &key).unwrap();
        assert_ne!(a, b);
    }
}
