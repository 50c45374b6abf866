//! Vault module — the append-only secret store file and its machinery.
//!
//! This module provides:
//! - typed line records and canonical signing strings (`entry`)
//! - the versioned header codec and format constants (`header`)
//! - O(1) line-seek reads (`reader`) and the indexed append-only
//!   writer with atomic rewrite (`writer`)
//! - advisory file locking (`lock`)
//! - access-control evaluation over versioned values (`access`)
//! - the locking, caching [`Manager`] (`manager`)
//! - format upgrades (`upgrade`) and defragmentation (`defrag`)

pub mod access;
pub mod defrag;
pub mod entry;
pub mod header;
pub mod lock;
pub mod manager;
pub mod reader;
pub mod upgrade;
pub mod writer;

// Re-export the most commonly used items.
pub use entry::{Entry, Identity, Secret, SecretValue};
pub use header::{Header, DATA_MARKER, HEADER_MARKER, LATEST_VERSION, MIN_SUPPORTED_VERSION};
pub use manager::{Manager, ManagerOptions};
pub use reader::Reader;
pub use writer::Writer;

use std::collections::HashMap;

use crate::crypto::VaultCrypto;
use crate::errors::{Result, SecLedgerError};
use crate::key::SecretKey;

/// The full in-memory contents of one vault file.
///
/// Identities keep their on-disk line order; secrets keep their
/// definition-line order with values attached in append order.  The
/// manager hands out references into its cached copy; callers never
/// mutate records through it.
#[derive(Debug, Clone, Default)]
pub struct Vault {
    pub identities: Vec<Identity>,
    pub secrets: Vec<Secret>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.secrets.is_empty()
    }

    /// Look up an identity by exact fingerprint.
    pub fn identity(&self, fingerprint: &str) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|id| id.fingerprint == fingerprint)
    }

    /// Look up a secret by key, tolerating case and legacy spellings.
    pub fn secret(&self, key: &str) -> Option<&Secret> {
        self.secrets
            .iter()
            .find(|s| SecretKey::lookup_matches(&s.key, key))
    }

    pub(crate) fn secret_mut(&mut self, key: &str) -> Option<&mut Secret> {
        self.secrets
            .iter_mut()
            .find(|s| SecretKey::lookup_matches(&s.key, key))
    }

    pub fn has_identity(&self, fingerprint: &str) -> bool {
        self.identity(fingerprint).is_some()
    }

    pub fn has_secret(&self, key: &str) -> bool {
        self.secret(key).is_some()
    }

    /// Total record count: identities, definitions, and values.
    pub fn entry_count(&self) -> usize {
        self.identities.len()
            + self
                .secrets
                .iter()
                .map(|s| 1 + s.values.len())
                .sum::<usize>()
    }

    /// Run two-step verification over every record in the vault.
    ///
    /// Each record's signer must itself be present; a missing signer is
    /// an [`SecLedgerError::UnknownSigner`] error before any hash is
    /// checked.
    pub fn verify(&self, crypto: &dyn VaultCrypto) -> Result<()> {
        let by_fingerprint: HashMap<&str, &Identity> = self
            .identities
            .iter()
            .map(|id| (id.fingerprint.as_str(), id))
            .collect();
        let signer_of = |fingerprint: &str| -> Result<&Identity> {
            by_fingerprint
                .get(fingerprint)
                .copied()
                .ok_or_else(|| SecLedgerError::UnknownSigner(fingerprint.to_string()))
        };

        for identity in &self.identities {
            let signer = signer_of(&identity.signed_by)?;
            identity.verify(crypto, &signer.public_key)?;
        }
        for secret in &self.secrets {
            secret.verify(crypto, signer_of(&secret.signed_by)?)?;
            for value in &secret.values {
                value.verify(crypto, signer_of(&value.signed_by)?, &secret.key)?;
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::memory::MemoryCrypto;
    use crate::crypto::Algorithm;

    const FP: &str = "9999999999999999999999999999999999999999";

    fn sample() -> (MemoryCrypto, Vault) {
        let crypto = MemoryCrypto::with_keys([FP]);
        let alice = Identity::self_signed(
            &crypto,
            FP,
            &MemoryCrypto::public_key_for(FP),
            Algorithm::new("ed25519", 256),
            "Alice",
        )
        .unwrap();
        let mut secret = Secret::create(&crypto, &alice, "ns::TOKEN").unwrap();
        secret.values.push(
            SecretValue::create(&crypto, &alice, "ns::TOKEN", vec![FP.into()], "YQ==".into())
                .unwrap(),
        );

        let vault = Vault {
            identities: vec![alice],
            secrets: vec![secret],
        };
        (crypto, vault)
    }

    #[test]
    fn lookups_normalise_keys() {
        let (_, vault) = sample();
        assert!(vault.has_secret("NS::token"));
        assert!(vault.secret("ns::TOKEN").is_some());
        assert!(!vault.has_secret("other::TOKEN"));
        assert_eq!(vault.entry_count(), 3);
    }

    #[test]
    fn verify_accepts_a_well_formed_vault() {
        let (crypto, vault) = sample();
        vault.verify(&crypto).unwrap();
    }

    #[test]
    fn verify_rejects_unknown_signers() {
        let (crypto, mut vault) = sample();
        vault.identities.clear();
        let err = vault.verify(&crypto).unwrap_err();
        assert_eq!(err.code(), "integrity/unknown-signer");
    }

    #[test]
    fn verify_rejects_tampered_values() {
        let (crypto, mut vault) = sample();
        vault.secrets[0].values[0].value = "dGFtcGVyZWQ=".into();
        let err = vault.verify(&crypto).unwrap_err();
        assert_eq!(err.code(), "integrity/hash-mismatch");
    }
}
