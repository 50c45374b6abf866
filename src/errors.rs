use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in secledger.
///
/// Every variant carries a stable machine-readable code (see
/// [`SecLedgerError::code`]) and maps to an [`ErrorCategory`] from which
/// front-ends derive a process exit code.
#[derive(Debug, Error)]
pub enum SecLedgerError {
    // --- Format errors ---
    #[error("Unrecognized vault file: missing header marker in {0}")]
    UnknownMarker(PathBuf),

    #[error("Malformed vault header: {0}")]
    MalformedHeader(String),

    #[error("Vault format version {found} is below the minimum supported version {minimum}")]
    VersionBelowMinimum { found: u32, minimum: u32 },

    #[error("Vault format version {found} is not supported (latest is {latest})")]
    UnsupportedVersion { found: u32, latest: u32 },

    #[error("Malformed entry at line {line}: {reason}")]
    MalformedEntry { line: usize, reason: String },

    #[error("Header references line {line} but the vault has only {total} lines")]
    InvalidLineReference { line: usize, total: usize },

    #[error("Vault file {0} is empty")]
    EmptyVaultFile(PathBuf),

    // --- Integrity errors ---
    #[error("Hash mismatch for {0} — the record may be tampered")]
    HashMismatch(String),

    #[error("Signature verification failed for {subject} (signed by {signed_by})")]
    SignatureInvalid { subject: String, signed_by: String },

    #[error("Record signed by unknown identity {0}")]
    UnknownSigner(String),

    // --- Access errors ---
    #[error("Identity {0} not found in vault")]
    IdentityNotFound(String),

    #[error("Access denied: {fingerprint} has no access to the latest value of '{key}'")]
    AccessDenied { key: String, fingerprint: String },

    #[error("Secret '{0}' has been deleted and cannot be overwritten")]
    SecretDeleted(String),

    #[error("Secret '{0}' is already deleted")]
    SecretAlreadyDeleted(String),

    #[error("Algorithm '{0}' is not allowed by policy")]
    AlgorithmNotAllowed(String),

    #[error("No signing fingerprint configured — select an identity first")]
    FingerprintRequired,

    // --- Concurrency errors ---
    #[error("Could not lock vault file {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Vault {0} is open read-only — write operations are unavailable")]
    ReadOnlyVault(PathBuf),

    // --- Crypto collaborator errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // --- Input errors ---
    #[error("Invalid secret key '{key}': {reason}")]
    InvalidSecretKey { key: String, reason: String },

    #[error("Invalid fingerprint '{0}': expected 40 hex characters")]
    InvalidFingerprint(String),

    #[error("Unknown vault index {0}")]
    UnknownVaultIndex(usize),

    #[error("Identity {0} is already present in the vault")]
    DuplicateIdentity(String),

    #[error("Secret '{0}' is already present in the vault")]
    DuplicateSecret(String),

    #[error("Secret '{0}' not found")]
    SecretNotFound(String),

    // --- Resolver errors ---
    #[error("No vault files could be opened")]
    NoVaultsOpened,

    #[error("Vault at index {0} is not open")]
    VaultNotOpen(usize),

    #[error("Path {0} is not in the configured vault list")]
    PathNotInConfig(PathBuf),

    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    // --- IO / serialization errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for secledger results.
pub type Result<T> = std::result::Result<T, SecLedgerError>;

/// Coarse error categories from which a numeric exit code is derived.
///
/// Front-ends map these straight to `std::process::exit` values so that
/// scripts can distinguish e.g. an access denial from a corrupt vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    General,
    Config,
    Vault,
    Crypto,
    Auth,
    Validation,
    FingerprintRequired,
    AccessDenied,
    AlgorithmNotAllowed,
}

impl ErrorCategory {
    /// The process exit code for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::General => 1,
            ErrorCategory::Config => 2,
            ErrorCategory::Vault => 3,
            ErrorCategory::Crypto => 4,
            ErrorCategory::Auth => 5,
            ErrorCategory::Validation => 6,
            ErrorCategory::FingerprintRequired => 7,
            ErrorCategory::AccessDenied => 8,
            ErrorCategory::AlgorithmNotAllowed => 9,
        }
    }
}

impl SecLedgerError {
    /// Stable machine-readable code for this error.
    ///
    /// Codes are part of the public contract: they never change for an
    /// existing variant, so callers may match on them across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SecLedgerError::UnknownMarker(_) => "format/unknown-marker",
            SecLedgerError::MalformedHeader(_) => "format/malformed-header",
            SecLedgerError::VersionBelowMinimum { .. } => "format/version-below-minimum",
            SecLedgerError::UnsupportedVersion { .. } => "format/unsupported-version",
            SecLedgerError::MalformedEntry { .. } => "format/malformed-entry",
            SecLedgerError::InvalidLineReference { .. } => "format/invalid-line-reference",
            SecLedgerError::EmptyVaultFile(_) => "format/empty-vault",
            SecLedgerError::HashMismatch(_) => "integrity/hash-mismatch",
            SecLedgerError::SignatureInvalid { .. } => "integrity/signature-invalid",
            SecLedgerError::UnknownSigner(_) => "integrity/unknown-signer",
            SecLedgerError::IdentityNotFound(_) => "access/identity-not-found",
            SecLedgerError::AccessDenied { .. } => "access/denied",
            SecLedgerError::SecretDeleted(_) => "access/secret-deleted",
            SecLedgerError::SecretAlreadyDeleted(_) => "access/secret-already-deleted",
            SecLedgerError::AlgorithmNotAllowed(_) => "access/algorithm-not-allowed",
            SecLedgerError::FingerprintRequired => "access/fingerprint-required",
            SecLedgerError::LockFailed { .. } => "concurrency/lock-failed",
            SecLedgerError::ReadOnlyVault(_) => "concurrency/read-only",
            SecLedgerError::EncryptionFailed(_) => "crypto/encryption-failed",
            SecLedgerError::DecryptionFailed(_) => "crypto/decryption-failed",
            SecLedgerError::SigningFailed(_) => "crypto/signing-failed",
            SecLedgerError::InvalidSecretKey { .. } => "input/invalid-secret-key",
            SecLedgerError::InvalidFingerprint(_) => "input/invalid-fingerprint",
            SecLedgerError::UnknownVaultIndex(_) => "input/unknown-vault-index",
            SecLedgerError::DuplicateIdentity(_) => "input/duplicate-identity",
            SecLedgerError::DuplicateSecret(_) => "input/duplicate-secret",
            SecLedgerError::SecretNotFound(_) => "input/secret-not-found",
            SecLedgerError::NoVaultsOpened => "resolver/no-vaults-opened",
            SecLedgerError::VaultNotOpen(_) => "resolver/vault-not-open",
            SecLedgerError::PathNotInConfig(_) => "resolver/path-not-in-config",
            SecLedgerError::VaultNotFound(_) => "io/vault-not-found",
            SecLedgerError::Io(_) => "io/failure",
            SecLedgerError::Serialization(_) => "io/serialization",
        }
    }

    /// The category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SecLedgerError::UnknownMarker(_)
            | SecLedgerError::MalformedHeader(_)
            | SecLedgerError::VersionBelowMinimum { .. }
            | SecLedgerError::UnsupportedVersion { .. }
            | SecLedgerError::MalformedEntry { .. }
            | SecLedgerError::InvalidLineReference { .. }
            | SecLedgerError::EmptyVaultFile(_)
            | SecLedgerError::LockFailed { .. }
            | SecLedgerError::ReadOnlyVault(_)
            | SecLedgerError::SecretDeleted(_)
            | SecLedgerError::SecretAlreadyDeleted(_)
            | SecLedgerError::SecretNotFound(_)
            | SecLedgerError::VaultNotOpen(_) => ErrorCategory::Vault,

            SecLedgerError::HashMismatch(_)
            | SecLedgerError::SignatureInvalid { .. }
            | SecLedgerError::EncryptionFailed(_)
            | SecLedgerError::DecryptionFailed(_)
            | SecLedgerError::SigningFailed(_) => ErrorCategory::Crypto,

            SecLedgerError::UnknownSigner(_) | SecLedgerError::IdentityNotFound(_) => {
                ErrorCategory::Auth
            }

            SecLedgerError::AccessDenied { .. } => ErrorCategory::AccessDenied,
            SecLedgerError::AlgorithmNotAllowed(_) => ErrorCategory::AlgorithmNotAllowed,
            SecLedgerError::FingerprintRequired => ErrorCategory::FingerprintRequired,

            SecLedgerError::InvalidSecretKey { .. }
            | SecLedgerError::InvalidFingerprint(_)
            | SecLedgerError::UnknownVaultIndex(_)
            | SecLedgerError::DuplicateIdentity(_)
            | SecLedgerError::DuplicateSecret(_) => ErrorCategory::Validation,

            SecLedgerError::NoVaultsOpened
            | SecLedgerError::PathNotInConfig(_)
            | SecLedgerError::VaultNotFound(_) => ErrorCategory::Config,

            SecLedgerError::Io(_) | SecLedgerError::Serialization(_) => ErrorCategory::General,
        }
    }

    /// Exit code shortcut: `self.category().exit_code()`.
    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        let err = SecLedgerError::DuplicateIdentity("abc".into());
        assert_eq!(err.code(), "input/duplicate-identity");

        let err = SecLedgerError::AccessDenied {
            key: "db::PASSWORD".into(),
            fingerprint: "0".repeat(40),
        };
        assert_eq!(err.code(), "access/denied");
    }

    #[test]
    fn categories_map_to_expected_exit_codes() {
        assert_eq!(ErrorCategory::General.exit_code(), 1);
        assert_eq!(ErrorCategory::Config.exit_code(), 2);
        assert_eq!(ErrorCategory::Vault.exit_code(), 3);
        assert_eq!(ErrorCategory::Crypto.exit_code(), 4);
        assert_eq!(ErrorCategory::Auth.exit_code(), 5);
        assert_eq!(ErrorCategory::Validation.exit_code(), 6);
        assert_eq!(ErrorCategory::FingerprintRequired.exit_code(), 7);
        assert_eq!(ErrorCategory::AccessDenied.exit_code(), 8);
        assert_eq!(ErrorCategory::AlgorithmNotAllowed.exit_code(), 9);
    }

    #[test]
    fn access_denied_is_its_own_category() {
        let err = SecLedgerError::AccessDenied {
            key: "SEC1".into(),
            fingerprint: "f".repeat(40),
        };
        assert_eq!(err.category(), ErrorCategory::AccessDenied);
        assert_eq!(err.exit_code(), 8);
    }

    #[test]
    fn deleted_secret_message_mentions_overwrite() {
        let err = SecLedgerError::SecretDeleted("API_KEY".into());
        let msg = err.to_string();
        assert!(msg.contains("deleted"));
        assert!(msg.contains("overwritten"));
    }
}
