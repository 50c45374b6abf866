//! Multi-vault resolution with configured precedence.
//!
//! A resolver owns one [`Manager`] per configured vault and searches
//! them in config order: index 0 wins.  Opening is resilient by
//! default — a vault that fails to load is skipped with its error
//! retrievable per index, and the sweep succeeds as long as at least
//! one vault opened.  Strict configuration turns any per-vault error
//! into an abort.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::{Settings, VaultConfigEntry};
use crate::errors::{Result, SecLedgerError};
use crate::key::SecretKey;
use crate::vault::{access, Identity, Manager, Secret, SecretValue};

/// The capability set front-ends program against.  Tests substitute an
/// in-memory implementation.
pub trait VaultResolver {
    /// Open every configured vault.  Returns how many opened.
    fn open_vaults(&mut self) -> Result<usize>;

    /// Unlock and drop every open manager.
    fn close_all(&mut self);

    /// A secret from one specific vault; the key is normalised first.
    fn get_secret(&self, index: usize, key: &str) -> Result<&Secret>;

    /// The first vault (in config order) containing `key`.
    fn get_secret_from_any_vault(&self, key: &str) -> Result<(usize, &Secret)>;

    /// The first vault whose copy of `key` grants `fingerprint` access.
    fn get_accessible_secret_from_any_vault(
        &self,
        key: &str,
        fingerprint: &str,
        strict: bool,
    ) -> Result<(usize, &SecretValue)>;

    /// Index of the first vault containing `key`.
    fn find_secret_vault_index(&self, key: &str) -> Option<usize>;

    fn identity_exists_in_vault(&self, fingerprint: &str, index: usize) -> Result<bool>;

    fn add_identity(&mut self, index: usize, identity: Identity) -> Result<()>;

    fn add_secret(&mut self, index: usize, secret: Secret) -> Result<()>;

    fn save_vault(&mut self, index: usize) -> Result<()>;

    fn is_path_in_config(&self, path: &Path) -> bool;
}

/// File-backed [`VaultResolver`] over the configured vault list.
pub struct Resolver {
    settings: Settings,
    /// One slot per config entry; `None` when skipped or failed.
    managers: Vec<Option<Manager>>,
    load_errors: HashMap<usize, SecLedgerError>,
}

impl Resolver {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            managers: Vec::new(),
            load_errors: HashMap::new(),
        }
    }

    /// A resolver over explicit entries, with default behaviour.
    pub fn from_entries(entries: Vec<VaultConfigEntry>) -> Self {
        Self::new(Settings {
            vaults: entries,
            ..Settings::default()
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of configured vaults (open or not).
    pub fn vault_count(&self) -> usize {
        self.settings.vaults.len()
    }

    /// Number of currently open vaults.
    pub fn open_count(&self) -> usize {
        self.managers.iter().flatten().count()
    }

    /// The load error recorded for a config index, if any.
    pub fn get_load_error(&self, index: usize) -> Option<&SecLedgerError> {
        self.load_errors.get(&index)
    }

    /// Enforce the restrict-to-configured-paths switch for ad-hoc
    /// vault paths handed in by the caller.
    pub fn check_path_allowed(&self, path: &Path) -> Result<()> {
        if self.settings.restrict_vault_paths && !self.is_path_in_config(path) {
            return Err(SecLedgerError::PathNotInConfig(path.to_path_buf()));
        }
        Ok(())
    }

    /// The open manager at `index`.
    pub fn manager(&self, index: usize) -> Result<&Manager> {
        if index >= self.settings.vaults.len() {
            return Err(SecLedgerError::UnknownVaultIndex(index));
        }
        self.managers
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(SecLedgerError::VaultNotOpen(index))
    }

    /// The open manager at `index`, mutably.
    pub fn manager_mut(&mut self, index: usize) -> Result<&mut Manager> {
        if index >= self.settings.vaults.len() {
            return Err(SecLedgerError::UnknownVaultIndex(index));
        }
        self.managers
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(SecLedgerError::VaultNotOpen(index))
    }

    /// Replace the configured list with explicit required paths and
    /// open them.  Every path must exist.
    pub fn open_vaults_from_paths(&mut self, paths: &[PathBuf]) -> Result<usize> {
        for path in paths {
            let resolved = crate::config::expand_tilde(path);
            if !resolved.exists() {
                return Err(SecLedgerError::VaultNotFound(resolved));
            }
        }
        self.settings.vaults = paths
            .iter()
            .map(|path| VaultConfigEntry::required(path.clone()))
            .collect();
        self.open_vaults_impl()
    }

    fn open_vaults_impl(&mut self) -> Result<usize> {
        self.close_all();
        self.managers = (0..self.settings.vaults.len()).map(|_| None).collect();

        let options = self.settings.manager_options();
        let mut opened = 0usize;

        for (index, entry) in self.settings.vaults.iter().enumerate() {
            let path = entry.resolved_path();

            let outcome = Self::open_one(&path, entry.optional, &options);
            match outcome {
                Ok(Some(manager)) => {
                    self.managers[index] = Some(manager);
                    opened += 1;
                }
                Ok(None) => {
                    debug!("skipping optional vault {}", path.display());
                }
                Err(e) => {
                    if self.settings.strict {
                        return Err(e);
                    }
                    warn!("could not open vault {}: {e}", path.display());
                    self.load_errors.insert(index, e);
                }
            }
        }

        if opened == 0 {
            return Err(SecLedgerError::NoVaultsOpened);
        }
        Ok(opened)
    }

    fn open_one(
        path: &Path,
        optional: bool,
        options: &crate::vault::ManagerOptions,
    ) -> Result<Option<Manager>> {
        match fs::metadata(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if optional {
                    return Ok(None);
                }
                return Err(SecLedgerError::VaultNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
            Ok(meta) if meta.len() == 0 => {
                return Err(SecLedgerError::EmptyVaultFile(path.to_path_buf()));
            }
            Ok(_) => {}
        }
        Manager::open_with_options(path, options.clone()).map(Some)
    }
}

impl VaultResolver for Resolver {
    fn open_vaults(&mut self) -> Result<usize> {
        self.open_vaults_impl()
    }

    fn close_all(&mut self) {
        for slot in &mut self.managers {
            if let Some(mut manager) = slot.take() {
                if let Err(e) = manager.unlock() {
                    warn!("error unlocking {}: {e}", manager.path().display());
                }
            }
        }
        self.load_errors.clear();
    }

    fn get_secret(&self, index: usize, key: &str) -> Result<&Secret> {
        self.manager(index)?
            .get_secret(key)
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))
    }

    fn get_secret_from_any_vault(&self, key: &str) -> Result<(usize, &Secret)> {
        for (index, manager) in self.managers.iter().enumerate() {
            let Some(manager) = manager else { continue };
            if let Some(secret) = manager.get_secret(key) {
                return Ok((index, secret));
            }
        }
        Err(SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(
            key,
        )))
    }

    fn get_accessible_secret_from_any_vault(
        &self,
        key: &str,
        fingerprint: &str,
        strict: bool,
    ) -> Result<(usize, &SecretValue)> {
        let mut found = false;
        for (index, manager) in self.managers.iter().enumerate() {
            let Some(manager) = manager else { continue };
            let Some(secret) = manager.get_secret(key) else {
                continue;
            };
            found = true;
            match access::evaluate(&secret.key, &secret.values, fingerprint, strict) {
                Ok(granted) => return Ok((index, granted.value)),
                Err(e) => debug!("vault {index} refused '{key}' for {fingerprint}: {e}"),
            }
        }

        if found {
            Err(SecLedgerError::AccessDenied {
                key: SecretKey::canonicalize_lossy(key),
                fingerprint: fingerprint.to_string(),
            })
        } else {
            Err(SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(
                key,
            )))
        }
    }

    fn find_secret_vault_index(&self, key: &str) -> Option<usize> {
        self.managers
            .iter()
            .enumerate()
            .find(|(_, manager)| {
                manager
                    .as_ref()
                    .map(|m| m.has_secret(key))
                    .unwrap_or(false)
            })
            .map(|(index, _)| index)
    }

    fn identity_exists_in_vault(&self, fingerprint: &str, index: usize) -> Result<bool> {
        Ok(self.manager(index)?.has_identity(fingerprint))
    }

    fn add_identity(&mut self, index: usize, identity: Identity) -> Result<()> {
        self.manager_mut(index)?.add_identity(identity)
    }

    fn add_secret(&mut self, index: usize, secret: Secret) -> Result<()> {
        self.manager_mut(index)?.add_secret(secret)
    }

    fn save_vault(&mut self, index: usize) -> Result<()> {
        self.manager_mut(index)?.save()
    }

    fn is_path_in_config(&self, path: &Path) -> bool {
        let resolved = crate::config::expand_tilde(path);
        self.settings
            .vaults
            .iter()
            .any(|entry| entry.resolved_path() == resolved)
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.close_all();
    }
}

// ── Tests ────────────────────────────────────────────────────────────
