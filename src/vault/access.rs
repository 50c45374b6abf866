//! Access-control evaluation over versioned values.
//!
//! A secret's values form an append-only history, oldest first.  Who
//! can read what is decided entirely by the recipient sets:
//!
//! - a deletion marker at the end makes the secret unreadable for
//!   everyone, regardless of access to earlier versions;
//! - strict mode grants access only through the latest value;
//! - fallback mode walks the history newest-to-oldest and serves the
//!   first value the reader can decrypt, with a warning.

use log::warn;

use super::entry::SecretValue;
use crate::errors::{Result, SecLedgerError};

/// A granted read: the value plus whether it is an older fallback
/// rather than the latest version.
#[derive(Debug)]
pub struct AccessibleValue<'a> {
    pub value: &'a SecretValue,
    pub is_fallback: bool,
}

/// Evaluate read access for `fingerprint` over `values`.
///
/// `key` is only used for diagnostics.  Returns the accessible value or
/// the reason access was refused: [`SecLedgerError::SecretDeleted`] when
/// the history ends in a deletion marker,
/// [`SecLedgerError::AccessDenied`] otherwise.
pub fn evaluate<'a>(
    key: &str,
    values: &'a [SecretValue],
    fingerprint: &str,
    strict: bool,
) -> Result<AccessibleValue<'a>> {
    let denied = || SecLedgerError::AccessDenied {
        key: key.to_string(),
        fingerprint: fingerprint.to_string(),
    };

    let latest = values.last().ok_or_else(denied)?;
    if latest.is_deletion_marker() {
        return Err(SecLedgerError::SecretDeleted(key.to_string()));
    }

    if strict {
        return if latest.available_to_contains(fingerprint) {
            Ok(AccessibleValue {
                value: latest,
                is_fallback: false,
            })
        } else {
            Err(denied())
        };
    }

    let last_index = values.len() - 1;
    for (index, value) in values.iter().enumerate().rev() {
        // Deletion markers have empty recipient sets, so they can
        // never match here.
        if value.available_to_contains(fingerprint) {
            let is_fallback = index != last_index;
            if is_fallback {
                warn!(
                    "{fingerprint} has no access to the latest value of '{key}'; \
                     serving version {} of {}",
                    index + 1,
                    values.len()
                );
            }
            return Ok(AccessibleValue { value, is_fallback });
        }
    }
    Err(denied())
}

/// Whether `fingerprint` can read the latest value.  This is the gate
/// for mutations that re-encrypt the current plaintext (share, revoke).
pub fn has_latest_access(values: &[SecretValue], fingerprint: &str) -> bool {
    values
        .last()
        .map(|latest| !latest.is_deletion_marker() && latest.available_to_contains(fingerprint))
        .unwrap_or(false)
}

// ── Tests ────────────────────────────────────────────────────────────
