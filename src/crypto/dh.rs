//! Diffie-Hellman session key agreement.
//!
//! Each handshake generates its own 2048-bit prime (not a fixed, shared
//! group — the source calls `rand.Prime`, a plain probabilistic prime,
//! not a Sophie-Germain "safe" prime) and uses the fixed generator 5.
//! The shared session key is `SHA-256(g^(ab) mod p)`.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use sha2::{Digest, Sha256};

pub const PRIVATE_KEY_LEN_BYTES: usize = 32;
pub const PRIME_BITS: u64 = 2048;
pub const GENERATOR: u32 = 5;

pub struct DhKeyPair {
    pub private: BigUint,
    pub public: BigUint,
}

/// Generate a random `bits`-bit prime via rejection sampling plus
/// Miller-Rabin, matching the source's per-session prime generation.
pub fn generate_prime(bits: u64) -> BigUint {
    let mut rng = rand::thread_rng();
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true); // force full bit length
        candidate.set_bit(0, true); // force odd
        if is_probably_prime(&candidate, 20) {
            return candidate;
        }
    }
}

pub fn generate_keypair(prime: &BigUint) -> DhKeyPair {
    let mut rng = rand::thread_rng();
    let mut priv_bytes = vec![0u8; PRIVATE_KEY_LEN_BYTES];
    rng.fill(priv_bytes.as_mut_slice());
    let private = BigUint::from_bytes_be(&priv_bytes);
    let generator = BigUint::from(GENERATOR);
    let public = generator.modpow(&private, prime);
    DhKeyPair { private, public }
}

/// Derive the AES-256 session key from the local private exponent and
/// the remote's public value.
pub fn shared_secret(prime: &BigUint, private: &BigUint, remote_public: &BigUint) -> [u8; 32] {
    let shared = remote_public.modpow(private, prime);
    let mut hasher = Sha256::new();
    hasher.update(shared.to_bytes_be());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Miller-Rabin primality test at `rounds` independent random witnesses.
fn is_probably_prime(n: &BigUint, rounds: u32) -> bool {
    let zero = BigUint::zero();
    let one = BigUint::one();
    let two = &one + &one;
    let three = &two + &one;

    if *n == two || *n == three {
        return true;
    }
    if n < &two || (n % &two) == zero {
        return false;
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r: u64 = 0;
    while (&d % &two) == zero {
        d = &d / &two;
        r += 1;
    }

    let mut rng = rand::thread_rng();
    let upper = n - &two;
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &upper);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..r.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_known_primes_pass() {
        assert!(is_probably_prime(&BigUint::from(7u32), 10));
        assert!(is_probably_prime(&BigUint::from(104729u32), 10));
    }

    #[test]
    fn small_known_composites_fail() {
        assert!(!is_probably_prime(&BigUint::from(9u32), 10));
        assert!(!is_probably_prime(&BigUint::from(100u32), 10));
    }

    #[test]
    fn shared_secret_agrees_both_directions() {
        let prime = BigUint::from(2147483647u64); // a known Mersenne prime
        let a = generate_keypair(&prime);
        let b = generate_keypair(&prime);
        let sa = shared_secret(&prime, &a.private, &b.public);
        let sb = shared_secret(&prime, &b.private, &a.public);
        assert_eq!(sa, sb);
    }

    #[test]
    fn generated_prime_passes_its_own_test() {
        // Smaller bit length to keep the test fast; production path uses
        // PRIME_BITS (2048).
        let p = generate_prime(128);
        assert!(is_probably_prime(&p, 20));
    }
}
