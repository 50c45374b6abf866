//! Shared fixtures for the integration suites.
//!
//! Not every suite uses every helper.
#![allow(dead_code)]

use rand::Rng;

use secledger::crypto::memory::MemoryCrypto;
use secledger::crypto::Algorithm;
use secledger::vault::Identity;

pub const ALICE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const BOB: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const CAROL: &str = "cccccccccccccccccccccccccccccccccccccccc";

/// A backend holding local keys for Alice, Bob, and Carol.
pub fn team_crypto() -> MemoryCrypto {
    MemoryCrypto::with_keys([ALICE, BOB, CAROL])
}

/// A self-signed identity for `fingerprint`.
pub fn identity(crypto: &MemoryCrypto, fingerprint: &str, uid: &str) -> Identity {
    Identity::self_signed(
        crypto,
        fingerprint,
        &MemoryCrypto::public_key_for(fingerprint),
        Algorithm::new("ed25519", 256),
        uid,
    )
    .unwrap()
}

/// A random 40-hex fingerprint.
pub fn random_fingerprint() -> String {
    let mut rng = rand::rng();
    (0..40)
        .map(|_| std::char::from_digit(rng.random_range(0..16), 16).unwrap())
        .collect()
}
