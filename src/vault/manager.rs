//! Vault manager: file lock, cached in-memory view, upgrade gate.
//!
//! A manager exclusively owns its open file handle, its advisory lock,
//! and its in-memory [`Vault`] copy for as long as it is held.  Reads
//! are served from the cache through `&self`; every mutation takes
//! `&mut self`, persists through the writer immediately, and then
//! updates the cache, so the cache always reflects the file.
//!
//! Plaintext for `put` is taken as an argument, never read from a
//! stream: callers that read stdin must do so before the manager is
//! opened, or a piped invocation can deadlock against its own lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::warn;
use zeroize::Zeroizing;

use super::access::{self, AccessibleValue};
use super::defrag::{self, FragmentationStats};
use super::entry::{Identity, Secret, SecretValue};
use super::lock::{self, LockMode};
use super::upgrade::{self, UpgradeOutcome};
use super::writer::Writer;
use super::Vault;
use crate::crypto::VaultCrypto;
use crate::errors::{Result, SecLedgerError};
use crate::key::SecretKey;

/// Behavioural switches consumed from the caller's configuration.
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Leave older-format vaults untouched and warn instead of
    /// auto-upgrading on open.
    pub require_explicit_vault_upgrade: bool,

    /// Algorithm allow-list for new identities.  Empty means all
    /// algorithms are accepted.
    pub allowed_algorithms: Vec<String>,
}

/// An open, locked vault.
pub struct Manager {
    path: PathBuf,
    /// The handle the advisory lock lives on.  `None` after `unlock`.
    lock_file: Option<File>,
    writer: Writer,
    vault: Vault,
    read_only: bool,
    options: ManagerOptions,
}

impl Manager {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Open and lock the vault at `path` with default options.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_options(path, ManagerOptions::default())
    }

    /// Open and lock the vault at `path`.
    ///
    /// A missing file is created; a file we lack write permission for
    /// is opened read-only under a shared lock instead.  Read-write
    /// opens run the upgrade gate before the vault is cached.
    pub fn open_with_options(path: &Path, options: ManagerOptions) -> Result<Self> {
        let (file, read_only) = open_handle(path)?;
        let mode = if read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        lock::acquire(&file, mode, path)?;

        let mut writer = if read_only {
            Writer::load_read_only(path)?
        } else {
            Writer::load(path)?
        };

        if !read_only {
            let outcome =
                upgrade::check_and_upgrade(&mut writer, options.require_explicit_vault_upgrade)?;
            if let UpgradeOutcome::Upgraded { .. } = outcome {
                writer = Writer::load(path)?;
            }
        }

        let vault = writer.read_vault()?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Some(file),
            writer,
            vault,
            read_only,
            options,
        })
    }

    // ------------------------------------------------------------------
    // Read accessors (cache-backed)
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn version(&self) -> u32 {
        self.writer.version()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn get_identity(&self, fingerprint: &str) -> Option<&Identity> {
        self.vault.identity(fingerprint)
    }

    pub fn get_secret(&self, key: &str) -> Option<&Secret> {
        self.vault.secret(key)
    }

    pub fn has_identity(&self, fingerprint: &str) -> bool {
        self.vault.has_identity(fingerprint)
    }

    pub fn has_secret(&self, key: &str) -> bool {
        self.vault.has_secret(key)
    }

    pub fn list_identities(&self) -> Vec<&Identity> {
        self.vault.identities.iter().collect()
    }

    pub fn list_secrets(&self) -> Vec<&Secret> {
        self.vault.secrets.iter().collect()
    }

    /// Evaluate read access for `fingerprint` on `key` (see
    /// [`access::evaluate`]).
    pub fn get_accessible_secret_value(
        &self,
        key: &str,
        fingerprint: &str,
        strict: bool,
    ) -> Result<AccessibleValue<'_>> {
        let secret = self
            .vault
            .secret(key)
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))?;
        access::evaluate(&secret.key, &secret.values, fingerprint, strict)
    }

    /// Decrypt the accessible value of `key` for `fingerprint`.
    ///
    /// Returns the plaintext plus whether an older version was served.
    pub fn decrypt_secret(
        &self,
        crypto: &dyn VaultCrypto,
        key: &str,
        fingerprint: &str,
        strict: bool,
    ) -> Result<(Zeroizing<Vec<u8>>, bool)> {
        let granted = self.get_accessible_secret_value(key, fingerprint, strict)?;
        let plaintext = Zeroizing::new(crypto.decrypt(fingerprint, &granted.value.value)?);
        Ok((plaintext, granted.is_fallback))
    }

    /// Run two-step verification over the whole cached vault.
    pub fn verify(&self, crypto: &dyn VaultCrypto) -> Result<()> {
        self.vault.verify(crypto)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Append an identity, subject to the algorithm allow-list.
    pub fn add_identity(&mut self, identity: Identity) -> Result<()> {
        self.ensure_writable()?;
        if identity.fingerprint.len() != crate::crypto::FINGERPRINT_LEN
            || !identity.fingerprint.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(SecLedgerError::InvalidFingerprint(identity.fingerprint));
        }
        if !self.options.allowed_algorithms.is_empty()
            && !self
                .options
                .allowed_algorithms
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&identity.algorithm.name))
        {
            return Err(SecLedgerError::AlgorithmNotAllowed(
                identity.algorithm.name.clone(),
            ));
        }

        self.writer.add_identity(&identity)?;
        self.vault.identities.push(identity);
        Ok(())
    }

    /// Append a secret definition together with any values it carries.
    pub fn add_secret(&mut self, secret: Secret) -> Result<()> {
        self.ensure_writable()?;
        self.writer.add_secret_with_values(&secret)?;
        self.vault.secrets.push(secret);
        Ok(())
    }

    /// Write a new value for `key`, creating the secret when absent.
    ///
    /// The plaintext is encrypted to `recipients` (the signer alone
    /// when the list is empty).  Writing over a deleted secret is
    /// refused.
    pub fn put_secret(
        &mut self,
        crypto: &dyn VaultCrypto,
        signer_fingerprint: &str,
        key: &str,
        plaintext: &[u8],
        recipients: &[String],
    ) -> Result<()> {
        self.ensure_writable()?;
        let canonical = SecretKey::parse(key)?.to_canonical();
        let signer = self.signer(signer_fingerprint)?;

        let recipients: Vec<String> = if recipients.is_empty() {
            vec![signer_fingerprint.to_string()]
        } else {
            recipients.to_vec()
        };
        for fingerprint in &recipients {
            if !self.vault.has_identity(fingerprint) {
                return Err(SecLedgerError::IdentityNotFound(fingerprint.clone()));
            }
        }

        match self.vault.secret(&canonical) {
            Some(existing) => {
                if existing.is_deleted() {
                    return Err(SecLedgerError::SecretDeleted(existing.key.clone()));
                }
                let stored_key = existing.key.clone();
                let ciphertext = crypto.encrypt(&recipients, plaintext)?;
                let value =
                    SecretValue::create(crypto, &signer, &stored_key, recipients, ciphertext)?;
                self.append_value(&stored_key, value)
            }
            None => {
                let mut secret = Secret::create(crypto, &signer, &canonical)?;
                let ciphertext = crypto.encrypt(&recipients, plaintext)?;
                secret.values.push(SecretValue::create(
                    crypto,
                    &signer,
                    &canonical,
                    recipients,
                    ciphertext,
                )?);
                self.add_secret(secret)
            }
        }
    }

    /// Re-encrypt the latest value to its recipients plus `target` and
    /// append the result as a new version.
    pub fn share_secret(
        &mut self,
        crypto: &dyn VaultCrypto,
        caller_fingerprint: &str,
        key: &str,
        target_fingerprint: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        let signer = self.signer(caller_fingerprint)?;
        if !self.vault.has_identity(target_fingerprint) {
            return Err(SecLedgerError::IdentityNotFound(
                target_fingerprint.to_string(),
            ));
        }

        let (stored_key, latest) = self.latest_for_rewrite(key, caller_fingerprint)?;
        if latest.available_to_contains(target_fingerprint) {
            warn!("{target_fingerprint} is already a recipient of '{stored_key}'");
            return Ok(());
        }

        let plaintext = Zeroizing::new(crypto.decrypt(caller_fingerprint, &latest.value)?);
        let mut recipients = latest.available_to.clone();
        recipients.push(target_fingerprint.to_string());

        let ciphertext = crypto.encrypt(&recipients, &plaintext)?;
        let value = SecretValue::create(crypto, &signer, &stored_key, recipients, ciphertext)?;
        self.append_value(&stored_key, value)
    }

    /// Re-encrypt the latest value without `target` and append the
    /// result.  The caller must presently have access to the latest
    /// value; self-revocation is allowed, and emptying the recipient
    /// set proceeds with a warning.
    pub fn revoke_secret(
        &mut self,
        crypto: &dyn VaultCrypto,
        caller_fingerprint: &str,
        key: &str,
        target_fingerprint: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        let signer = self.signer(caller_fingerprint)?;

        let (stored_key, latest) = self.latest_for_rewrite(key, caller_fingerprint)?;
        if !latest.available_to_contains(target_fingerprint) {
            warn!("{target_fingerprint} is not a recipient of '{stored_key}'; nothing to revoke");
            return Ok(());
        }

        let plaintext = Zeroizing::new(crypto.decrypt(caller_fingerprint, &latest.value)?);
        let recipients: Vec<String> = latest
            .available_to
            .iter()
            .filter(|fp| fp.as_str() != target_fingerprint)
            .cloned()
            .collect();
        if recipients.is_empty() {
            warn!("revoking the last recipient of '{stored_key}'; nobody can read it anymore");
        }

        let ciphertext = crypto.encrypt(&recipients, &plaintext)?;
        let value = SecretValue::create(crypto, &signer, &stored_key, recipients, ciphertext)?;
        self.append_value(&stored_key, value)
    }

    /// Soft-delete: append a deletion marker.
    ///
    /// Refused when the secret is already deleted or the caller cannot
    /// read any version of it.
    pub fn forget_secret(
        &mut self,
        crypto: &dyn VaultCrypto,
        caller_fingerprint: &str,
        key: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        let signer = self.signer(caller_fingerprint)?;

        let secret = self
            .vault
            .secret(key)
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))?;
        if secret.is_deleted() {
            return Err(SecLedgerError::SecretAlreadyDeleted(secret.key.clone()));
        }
        access::evaluate(&secret.key, &secret.values, caller_fingerprint, false)?;
        let stored_key = secret.key.clone();

        let marker = SecretValue::deletion_marker(crypto, &signer, &stored_key)?;
        self.append_value(&stored_key, marker)
    }

    /// Retained for API symmetry: the writer persists on every append,
    /// so there is nothing left to save.
    pub fn save(&mut self) -> Result<()> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Fragmentation metrics for the current file.
    pub fn fragmentation_stats(&self) -> FragmentationStats {
        defrag::analyze(self.writer.header(), self.writer.total_lines())
    }

    /// Rewrite the file in canonical order (see [`defrag`]).
    pub fn defragment(&mut self) -> Result<FragmentationStats> {
        self.ensure_writable()?;
        let mut vault = self.vault.clone();
        defrag::canonical_order(&mut vault);
        self.writer.rewrite_from_vault(&vault, None)?;
        self.vault = vault;
        Ok(self.fragmentation_stats())
    }

    /// Explicit upgrade entry point for callers running with
    /// `require_explicit_vault_upgrade`.
    pub fn upgrade(&mut self) -> Result<UpgradeOutcome> {
        self.ensure_writable()?;
        let outcome = upgrade::upgrade(&mut self.writer)?;
        if let UpgradeOutcome::Upgraded { .. } = outcome {
            self.writer = Writer::load(&self.path)?;
            self.vault = self.writer.read_vault()?;
        }
        Ok(outcome)
    }

    /// Release the lock and close the file.  Safe to call twice; reads
    /// keep working from the cache afterwards.
    pub fn unlock(&mut self) -> Result<()> {
        if let Some(file) = self.lock_file.take() {
            lock::release(&file)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(SecLedgerError::ReadOnlyVault(self.path.clone()))
        } else {
            Ok(())
        }
    }

    fn signer(&self, fingerprint: &str) -> Result<Identity> {
        self.vault
            .identity(fingerprint)
            .cloned()
            .ok_or_else(|| SecLedgerError::IdentityNotFound(fingerprint.to_string()))
    }

    /// The latest value of `key`, gated on the caller being able to
    /// read it: the precondition for share and revoke, which re-encrypt
    /// the current plaintext.
    fn latest_for_rewrite(
        &self,
        key: &str,
        caller_fingerprint: &str,
    ) -> Result<(String, SecretValue)> {
        let secret = self
            .vault
            .secret(key)
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))?;

        let latest = secret
            .latest_value()
            .ok_or_else(|| SecLedgerError::AccessDenied {
                key: secret.key.clone(),
                fingerprint: caller_fingerprint.to_string(),
            })?;
        if latest.is_deletion_marker() {
            return Err(SecLedgerError::SecretDeleted(secret.key.clone()));
        }
        if !latest.available_to_contains(caller_fingerprint) {
            return Err(SecLedgerError::AccessDenied {
                key: secret.key.clone(),
                fingerprint: caller_fingerprint.to_string(),
            });
        }
        Ok((secret.key.clone(), latest.clone()))
    }

    fn append_value(&mut self, stored_key: &str, value: SecretValue) -> Result<()> {
        self.writer.add_secret_value(stored_key, &value)?;
        self.vault
            .secret_mut(stored_key)
            .expect("cache and writer agree on existing secrets")
            .values
            .push(value);
        Ok(())
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}

/// Open the file handle, falling back to read-only on permission
/// failure.  Creates a missing file (and its parent directory) so the
/// lock has an inode to live on.
fn open_handle(path: &Path) -> Result<(File, bool)> {
    let exists = path.exists();
    if !exists {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_parent(parent)?;
            }
        }
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if !exists {
        options.create(true);
        // New vaults start at 0600; later rewrites preserve whatever
        // the owner changes it to.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
    }

    match options.open(path) {
        Ok(file) => Ok((file, false)),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(
                "no write permission on {}; opening read-only",
                path.display()
            );
            let file = OpenOptions::new().read(true).open(path)?;
            Ok((file, true))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn create_parent(parent: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(parent)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_parent(parent: &Path) -> Result<()> {
    std::fs::create_dir_all(parent)?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
