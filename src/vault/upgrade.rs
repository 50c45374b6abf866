//! Format version detection and in-place upgrade.
//!
//! The header codec refuses anything below the minimum supported
//! version, so by the time a writer has loaded, the only decision left
//! is whether to rewrite an older-but-supported file at the latest
//! format.  That choice belongs to the caller's configuration: teams
//! sharing a vault across mixed tool versions set
//! `require_explicit_vault_upgrade` and run the upgrade deliberately.

use log::{info, warn};

use super::header::LATEST_VERSION;
use super::writer::Writer;
use crate::errors::Result;

/// What the upgrade gate decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Already at the latest version.
    UpToDate,
    /// Rewritten at the latest version.
    Upgraded { from: u32 },
    /// Older format left in place; an explicit upgrade is required.
    Pending { from: u32 },
}

/// Check the writer's on-disk version and upgrade it unless the caller
/// requires explicit upgrades.
pub fn check_and_upgrade(writer: &mut Writer, require_explicit: bool) -> Result<UpgradeOutcome> {
    let from = writer.version();
    if from >= LATEST_VERSION {
        return Ok(UpgradeOutcome::UpToDate);
    }
    if require_explicit {
        warn!(
            "vault {} uses format v{from}; upgrade to v{LATEST_VERSION} to use the current format",
            writer.path().display()
        );
        return Ok(UpgradeOutcome::Pending { from });
    }
    upgrade(writer)
}

/// Rewrite the vault at the latest format version.
///
/// The full vault is materialised from the old format and written back
/// through the writer's canonical rewrite, preserving every identity,
/// secret, and value.
pub fn upgrade(writer: &mut Writer) -> Result<UpgradeOutcome> {
    let from = writer.version();
    if from >= LATEST_VERSION {
        return Ok(UpgradeOutcome::UpToDate);
    }

    let vault = writer.read_vault()?;
    writer.rewrite_from_vault(&vault, Some(LATEST_VERSION))?;
    info!(
        "upgraded vault {} from format v{from} to v{LATEST_VERSION}",
        writer.path().display()
    );
    Ok(UpgradeOutcome::Upgraded { from })
}

// ── Tests ────────────────────────────────────────────────────────────
