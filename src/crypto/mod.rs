//! Cryptographic collaborator interface.
//!
//! The core never pins an algorithm.  It consumes a capability set —
//! hashing at a strength class, detached signing and verification,
//! multi-recipient encryption, local-key inspection — through the
//! [`VaultCrypto`] trait, and stores the signer's algorithm descriptor
//! in each identity record.  Production builds plug in a real
//! public-key backend; the crate's own tests use [`memory::MemoryCrypto`].

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Expected length of an identity fingerprint (40 hex characters).
pub const FINGERPRINT_LEN: usize = 40;

/// Algorithm descriptor recorded with every identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithm {
    /// Algorithm family, e.g. "rsa", "ecdsa", "ed25519".
    pub name: String,

    /// Key size in bits (curve size for EC-family algorithms).
    pub bits: u32,

    /// Curve name for EC-family algorithms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
}

impl Algorithm {
    pub fn new(name: &str, bits: u32) -> Self {
        Self {
            name: name.to_string(),
            bits,
            curve: None,
        }
    }

    pub fn with_curve(name: &str, bits: u32, curve: &str) -> Self {
        Self {
            name: name.to_string(),
            bits,
            curve: Some(curve.to_string()),
        }
    }

    /// Whether this is an elliptic-curve family algorithm, which uses a
    /// different bits→strength scale than integer-factorisation keys.
    pub fn is_elliptic(&self) -> bool {
        matches!(
            self.name.to_ascii_lowercase().as_str(),
            "ecdsa" | "eddsa" | "ed25519" | "ed448" | "ecdh" | "x25519"
        )
    }

    /// The hash strength class matched to this algorithm.
    pub fn hash_strength(&self) -> HashStrength {
        HashStrength::for_algorithm(self)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.curve {
            Some(curve) => write!(f, "{}-{} ({curve})", self.name, self.bits),
            None => write!(f, "{}-{}", self.name, self.bits),
        }
    }
}

/// Hash strength classes.  The class is deterministic per
/// (algorithm, bits) so that every party recomputes identical canonical
/// hashes for the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStrength {
    Bits256,
    Bits384,
    Bits512,
}

impl HashStrength {
    /// Map an algorithm descriptor to its strength class.
    ///
    /// EC-family keys carry their security level in far fewer bits than
    /// RSA-style keys, so the two scales differ.
    pub fn for_algorithm(algorithm: &Algorithm) -> Self {
        if algorithm.is_elliptic() {
            match algorithm.bits {
                0..=256 => HashStrength::Bits256,
                257..=384 => HashStrength::Bits384,
                _ => HashStrength::Bits512,
            }
        } else {
            match algorithm.bits {
                0..=2048 => HashStrength::Bits256,
                2049..=3072 => HashStrength::Bits384,
                _ => HashStrength::Bits512,
            }
        }
    }

    /// Length of a hex-encoded hash at this strength.
    pub fn hex_len(self) -> usize {
        match self {
            HashStrength::Bits256 => 64,
            HashStrength::Bits384 => 96,
            HashStrength::Bits512 => 128,
        }
    }
}

/// Capabilities the core consumes from the cryptographic backend.
///
/// Hashes and signatures travel as hex strings, ciphertexts as base64,
/// matching the on-disk record encoding.
pub trait VaultCrypto {
    /// Canonical hash of `data` at the given strength class, hex-encoded.
    fn hash(&self, data: &[u8], strength: HashStrength) -> Result<String>;

    /// Sign a canonical hash with the local secret key identified by
    /// `fingerprint`.  Returns the detached signature, hex-encoded.
    fn sign(&self, fingerprint: &str, hash: &str) -> Result<String>;

    /// Verify a detached signature over `hash` against a public key blob.
    fn verify(&self, public_key: &str, hash: &str, signature: &str) -> Result<bool>;

    /// Encrypt `plaintext` to every fingerprint in `recipients`.
    /// Returns base64 ciphertext.
    fn encrypt(&self, recipients: &[String], plaintext: &[u8]) -> Result<String>;

    /// Decrypt a base64 ciphertext with the local secret key identified
    /// by `fingerprint`.
    fn decrypt(&self, fingerprint: &str, ciphertext: &str) -> Result<Vec<u8>>;

    /// Fingerprints of all locally available secret keys.
    fn secret_key_fingerprints(&self) -> Result<Vec<String>>;

    /// Whether a local secret key exists for `fingerprint`.
    fn has_secret_key(&self, fingerprint: &str) -> bool {
        self.secret_key_fingerprints()
            .map(|fps| fps.iter().any(|fp| fp == fingerprint))
            .unwrap_or(false)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
