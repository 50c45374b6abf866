//! Deterministic in-memory crypto backend.
//!
//! A reference implementation of [`VaultCrypto`] with no key material on
//! disk.  "Encryption" wraps the plaintext in a recipient-stamped
//! envelope and decryption enforces recipient membership, so
//! access-control paths exercise real denials in tests.  Not suitable
//! for protecting actual secrets.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::{HashStrength, VaultCrypto};
use crate::errors::{Result, SecLedgerError};

/// Prefix that marks a public key blob as belonging to this backend.
const PUBLIC_KEY_PREFIX: &str = "mem-pub:";

/// Domain separator mixed into every signature.
const SIGN_CONTEXT: &str = "secledger-mem-sign";

/// In-memory [`VaultCrypto`] backend.
///
/// Holds the set of fingerprints for which a "local secret key" exists.
/// Signing and decryption succeed only for those fingerprints.
#[derive(Debug, Default, Clone)]
pub struct MemoryCrypto {
    local_keys: BTreeSet<String>,
}

/// The envelope "ciphertext" format: recipient set plus base64 payload.
#[derive(Serialize, Deserialize)]
struct Envelope {
    recipients: Vec<String>,
    data: String,
}

impl MemoryCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend holding local secret keys for the given fingerprints.
    pub fn with_keys<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local_keys: fingerprints.into_iter().map(Into::into).collect(),
        }
    }

    /// Register a local secret key for `fingerprint`.
    pub fn add_key(&mut self, fingerprint: &str) {
        self.local_keys.insert(fingerprint.to_string());
    }

    /// The public key blob this backend publishes for a fingerprint.
    pub fn public_key_for(fingerprint: &str) -> String {
        format!("{PUBLIC_KEY_PREFIX}{fingerprint}")
    }

    fn require_key(&self, fingerprint: &str) -> Result<()> {
        if self.local_keys.contains(fingerprint) {
            Ok(())
        } else {
            Err(SecLedgerError::SigningFailed(format!(
                "no local secret key for {fingerprint}"
            )))
        }
    }

    fn signature_for(fingerprint: &str, hash: &str) -> String {
        let material = format!("{SIGN_CONTEXT}:{fingerprint}:{hash}");
        hex::encode(Sha256::digest(material.as_bytes()))
    }
}

impl VaultCrypto for MemoryCrypto {
    fn hash(&self, data: &[u8], strength: HashStrength) -> Result<String> {
        let digest = match strength {
            HashStrength::Bits256 => hex::encode(Sha256::digest(data)),
            HashStrength::Bits384 => hex::encode(Sha384::digest(data)),
            HashStrength::Bits512 => hex::encode(Sha512::digest(data)),
        };
        Ok(digest)
    }

    fn sign(&self, fingerprint: &str, hash: &str) -> Result<String> {
        self.require_key(fingerprint)?;
        Ok(Self::signature_for(fingerprint, hash))
    }

    fn verify(&self, public_key: &str, hash: &str, signature: &str) -> Result<bool> {
        let fingerprint = public_key.strip_prefix(PUBLIC_KEY_PREFIX).ok_or_else(|| {
            SecLedgerError::SigningFailed(format!(
                "public key blob is not a memory-backend key: {public_key}"
            ))
        })?;
        Ok(Self::signature_for(fingerprint, hash) == signature)
    }

    fn encrypt(&self, recipients: &[String], plaintext: &[u8]) -> Result<String> {
        let mut sorted: Vec<String> = recipients.to_vec();
        sorted.sort();
        let envelope = Envelope {
            recipients: sorted,
            data: BASE64.encode(plaintext),
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|e| SecLedgerError::EncryptionFailed(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    fn decrypt(&self, fingerprint: &str, ciphertext: &str) -> Result<Vec<u8>> {
        if !self.local_keys.contains(fingerprint) {
            return Err(SecLedgerError::DecryptionFailed(format!(
                "no local secret key for {fingerprint}"
            )));
        }

        let json = BASE64
            .decode(ciphertext)
            .map_err(|e| SecLedgerError::DecryptionFailed(format!("bad envelope: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&json)
            .map_err(|e| SecLedgerError::DecryptionFailed(format!("bad envelope: {e}")))?;

        // Membership check is what gives tests real access denials.
        if !envelope.recipients.iter().any(|fp| fp == fingerprint) {
            return Err(SecLedgerError::DecryptionFailed(format!(
                "{fingerprint} is not in the recipient set"
            )));
        }

        BASE64
            .decode(&envelope.data)
            .map_err(|e| SecLedgerError::DecryptionFailed(format!("bad payload: {e}")))
    }

    fn secret_key_fingerprints(&self) -> Result<Vec<String>> {
        Ok(self.local_keys.iter().cloned().collect())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
