//! Crate-wide error type.
//!
//! Handshake rejection and authentication failure are local conditions:
//! callers log and drop, the protocol loop continues. I/O and crypto
//! failures are logged and the loop continues. Only socket bind failure
//! and signing-key load failure are fatal at startup.

#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("authentication failed")]
    Auth,

    #[error("not found")]
    NotFound,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
