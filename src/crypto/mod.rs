//! Cryptographic primitives: the AEAD wire codec, Diffie-Hellman session
//! establishment, and Ed25519 command signing/verification.

pub mod aead;
pub mod dh;
pub mod signing;
