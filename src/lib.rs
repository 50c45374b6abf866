//! secledger — a file-backed, team-shareable secret store.
//!
//! A vault is a single UTF-8 text file: a three-line preamble (marker,
//! header JSON, data marker) followed by one immutable, signed JSON
//! record per line.  The header maps identities and secrets to their
//! line numbers, so individual records are a single seek away.  Every
//! change appends; nothing is edited in place.
//!
//! Secret values are encrypted to one or more recipients through an
//! external public-key backend (the [`crypto::VaultCrypto`] trait).
//! Sharing, revoking, and soft-deleting a secret all append a new
//! version, and reads evaluate the versioned history under strict or
//! fallback access semantics.
//!
//! Entry points:
//! - [`vault::Manager`] — open, lock, and mutate one vault;
//! - [`resolver::Resolver`] — search several vaults under a configured
//!   precedence;
//! - [`vault::Reader`] — direct record reads without a write lock.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod key;
pub mod resolver;
pub mod vault;

pub use errors::{ErrorCategory, Result, SecLedgerError};
pub use key::SecretKey;
