//! Ed25519 keypair generator for the application command signer.
//!
//! Generates a fresh keypair, writes the raw 64-byte private key (seed
//! || public key, the same layout `priv_key.pem` is read back in) to
//! disk, and prints the public key as a Rust snippet to paste into
//! `crypto::signing::SIGNER_PUBKEY` if this key is meant to replace the
//! currently hard-coded signer.

use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keygen", version, about = "Generate an ed25519 command-signing keypair")]
struct Args {
    /// Output path for the raw private key file.
    #[arg(short, long, default_value = "priv_key.pem")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();

    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let mut raw = signing_key.to_bytes().to_vec();
    raw.extend_from_slice(verifying_key.as_bytes());
    assert_eq!(raw.len(), 64);

    fs::write(&args.output, &raw).expect("failed to write private key file");
    println!("Private key written to: {}", args.output.display());
    println!();

    println!("Public key (paste into crypto::signing::SIGNER_PUBKEY if rotating the signer):");
    print!("pub const SIGNER_PUBKEY: [u8; 32] = [");
    for (i, byte) in verifying_key.as_bytes().iter().enumerate() {
        if i > 0 {
            print!(", ");
        }
        print!("{byte}");
    }
    println!("];");
    println!();

    let test_message = b"keygen self-verification";
    use ed25519_dalek::{Signer, Verifier};
    let signature = signing_key.sign(test_message);
    match verifying_key.verify(test_message, &signature) {
        Ok(()) => println!("Self-verification: PASSED"),
        Err(_) => {
            eprintln!("Self-verification: FAILED");
            std::process::exit(1);
        }
    }
}
