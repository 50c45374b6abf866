//! Configuration types consumed from the front-end.
//!
//! The core does not load configuration files itself; the CLI (or any
//! other embedder) parses whatever source it likes and hands the core
//! these shapes through constructors.  The only path processing done
//! here is `~` expansion, so vault lists can be shared between team
//! members with different home directories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SecLedgerError};
use crate::vault::ManagerOptions;

/// One vault in the search order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfigEntry {
    /// Vault file path; a leading `~` expands to the home directory.
    pub path: PathBuf,

    /// Optional vaults are silently skipped when the file is missing.
    #[serde(default)]
    pub optional: bool,
}

impl VaultConfigEntry {
    /// A required vault at `path`.
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            optional: false,
        }
    }

    /// An optional vault at `path`.
    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            optional: true,
        }
    }

    /// The path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_tilde(&self.path)
    }
}

/// Expand a leading `~` component to the current user's home directory.
///
/// Paths without one (and `~user` forms, which are not supported) pass
/// through unchanged, as does everything when no home directory can be
/// determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Everything the core consumes from the caller's configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Ordered vault search list; index 0 has the highest precedence.
    #[serde(default)]
    pub vaults: Vec<VaultConfigEntry>,

    /// Fingerprint of the active identity, used as the signer for all
    /// mutations.
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Warn instead of auto-upgrading older vault formats on open.
    #[serde(default)]
    pub require_explicit_vault_upgrade: bool,

    /// Abort multi-vault operations on the first per-vault error
    /// instead of skipping and warning.
    #[serde(default)]
    pub strict: bool,

    /// Refuse operations on vault paths outside the configured list.
    #[serde(default)]
    pub restrict_vault_paths: bool,

    /// Algorithm allow-list for new identities; empty accepts all.
    #[serde(default)]
    pub allowed_algorithms: Vec<String>,
}

impl Settings {
    /// The signing fingerprint, or the error front-ends turn into the
    /// fingerprint-required exit code.
    pub fn signer_fingerprint(&self) -> Result<&str> {
        self.fingerprint
            .as_deref()
            .ok_or(SecLedgerError::FingerprintRequired)
    }

    /// The per-manager switches derived from these settings.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            require_explicit_vault_upgrade: self.require_explicit_vault_upgrade,
            allowed_algorithms: self.allowed_algorithms.clone(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
