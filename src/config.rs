//! Command-line configuration.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Kademlia-style overlay node: routing table, bootstrap, DH session
/// handshake, and a locally-mined signed event chain.
#[derive(Parser, Debug, Clone)]
#[command(name = "kad-overlay", version, about)]
pub struct Args {
    /// Address of an existing node to bootstrap from.
    pub boot_addr: Option<IpAddr>,

    /// UDP port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Path to the raw ed25519 signing key.
    #[arg(long, default_value = "priv_key.pem")]
    pub key: PathBuf,

    /// tracing_subscriber::EnvFilter directive.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub const DEFAULT_PORT: u16 = 4444;
pub const DEFAULT_K: usize = 20;
pub const DEFAULT_DIFFICULTY: u32 = 3;
pub const BLACKLIST_DIFFICULTY: u32 = 15;
pub const ALPHA: usize = 3;
pub const GENERATOR: u32 = crate::crypto::dh::GENERATOR;
