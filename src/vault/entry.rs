//! Typed line records and their serialisation.
//!
//! Every data line in a vault file is one JSON object:
//!
//! ```text
//! {"type": "identity", "data": {...}}
//! {"type": "secret",   "data": {...}}
//! {"type": "value",    "secret": "ns::NAME", "data": {...}}
//! ```
//!
//! Records are immutable once appended.  Each carries a canonical hash
//! at the signer's strength class and a detached signature over that
//! hash, so tampering and forged records are detectable independently.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{Algorithm, VaultCrypto};
use crate::errors::{Result, SecLedgerError};

/// Render a timestamp the way canonical strings and the wire format
/// expect it: RFC3339, nanosecond precision, always UTC.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A recipient/signer: fingerprint, public key, and algorithm descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// 40-hex key fingerprint; the identity's stable name.
    pub fingerprint: String,

    /// Public key blob in whatever encoding the crypto backend emits.
    pub public_key: String,

    /// Algorithm name, bit class, and optional curve.
    pub algorithm: Algorithm,

    /// Human-readable user id, e.g. "Alice <alice@example.com>".
    pub uid: String,

    /// When the key pair itself was created.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// Key expiry, if the backend reports one.
    #[serde(
        default,
        with = "timestamp_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// When the identity was added to this vault.
    #[serde(with = "timestamp")]
    pub added_at: DateTime<Utc>,

    /// Canonical hash, hex.  The hashed material is defined by the
    /// crypto collaborator; the core only checks self-consistency.
    pub hash: String,

    /// Fingerprint of the signing identity (self or counter-signer).
    pub signed_by: String,

    /// Detached signature over `hash`, hex.
    pub signature: String,
}

impl Identity {
    /// Build a self-signed identity through the crypto collaborator.
    ///
    /// The hashed material binds fingerprint, uid, and creation time;
    /// the exact shape is a convenience of this constructor, not part
    /// of the file format.
    pub fn self_signed(
        crypto: &dyn VaultCrypto,
        fingerprint: &str,
        public_key: &str,
        algorithm: Algorithm,
        uid: &str,
    ) -> Result<Self> {
        let now = Utc::now();
        let material = format!(
            "identity:{}:{fingerprint}:{uid}",
            format_timestamp(&now)
        );
        let hash = crypto.hash(material.as_bytes(), algorithm.hash_strength())?;
        let signature = crypto.sign(fingerprint, &hash)?;

        Ok(Self {
            fingerprint: fingerprint.to_string(),
            public_key: public_key.to_string(),
            algorithm,
            uid: uid.to_string(),
            created_at: now,
            expires_at: None,
            added_at: now,
            hash,
            signed_by: fingerprint.to_string(),
            signature,
        })
    }

    /// Verify the detached signature over the stored hash.
    ///
    /// `signer_public_key` is the public key of `signed_by` (the same
    /// identity for self-signatures).
    pub fn verify(&self, crypto: &dyn VaultCrypto, signer_public_key: &str) -> Result<()> {
        if crypto.verify(signer_public_key, &self.hash, &self.signature)? {
            Ok(())
        } else {
            Err(SecLedgerError::SignatureInvalid {
                subject: format!("identity {}", self.fingerprint),
                signed_by: self.signed_by.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Secret definition
// ---------------------------------------------------------------------------

/// A named, versioned container of values under a canonical key.
///
/// On disk only the definition fields are serialized; the value list is
/// reassembled from the separate value records the header points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    /// Canonical secret key (see [`crate::key::SecretKey`]).
    pub key: String,

    #[serde(with = "timestamp")]
    pub added_at: DateTime<Utc>,

    /// Fingerprint of the identity that signed the definition.
    pub signed_by: String,

    /// Canonical hash, hex.
    pub hash: String,

    /// Detached signature over `hash`, hex.
    pub signature: String,

    /// Ordered value versions, oldest first.  Never serialized with the
    /// definition record.
    #[serde(skip)]
    pub values: Vec<SecretValue>,
}

impl Secret {
    /// The canonical signing string: `secret:<added_at>:<key>:<signed_by>`.
    pub fn canonical_string(&self) -> String {
        format!(
            "secret:{}:{}:{}",
            format_timestamp(&self.added_at),
            self.key,
            self.signed_by
        )
    }

    /// Build a signed secret definition with no values yet.
    pub fn create(crypto: &dyn VaultCrypto, signer: &Identity, key: &str) -> Result<Self> {
        let mut secret = Self {
            key: key.to_string(),
            added_at: Utc::now(),
            signed_by: signer.fingerprint.clone(),
            hash: String::new(),
            signature: String::new(),
            values: Vec::new(),
        };
        secret.hash = crypto.hash(
            secret.canonical_string().as_bytes(),
            signer.algorithm.hash_strength(),
        )?;
        secret.signature = crypto.sign(&signer.fingerprint, &secret.hash)?;
        Ok(secret)
    }

    /// The chronologically newest value, if any.
    pub fn latest_value(&self) -> Option<&SecretValue> {
        self.values.last()
    }

    /// A secret is deleted iff its newest value is a deletion marker.
    pub fn is_deleted(&self) -> bool {
        self.latest_value().is_some_and(SecretValue::is_deletion_marker)
    }

    /// Two-step verification: recompute the canonical hash at the
    /// signer's strength and compare, then verify the signature.
    pub fn verify(&self, crypto: &dyn VaultCrypto, signer: &Identity) -> Result<()> {
        let computed = crypto.hash(
            self.canonical_string().as_bytes(),
            signer.algorithm.hash_strength(),
        )?;
        if computed != self.hash {
            return Err(SecLedgerError::HashMismatch(format!("secret '{}'", self.key)));
        }
        if crypto.verify(&signer.public_key, &self.hash, &self.signature)? {
            Ok(())
        } else {
            Err(SecLedgerError::SignatureInvalid {
                subject: format!("secret '{}'", self.key),
                signed_by: self.signed_by.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Secret value
// ---------------------------------------------------------------------------

/// One versioned ciphertext of a secret, with its recipient set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretValue {
    #[serde(with = "timestamp")]
    pub added_at: DateTime<Utc>,

    /// Fingerprints able to decrypt this value, sorted lexicographically
    /// before signing.
    pub available_to: Vec<String>,

    /// Base64 ciphertext.  Empty for deletion markers.
    pub value: String,

    /// Deletion marker flag.
    pub deleted: bool,

    /// Canonical hash, hex.
    pub hash: String,

    /// Fingerprint of the signing identity.
    pub signed_by: String,

    /// Detached signature over `hash`, hex.
    pub signature: String,
}

impl SecretValue {
    /// The canonical signing string:
    /// `value:<added_at>:<secret_key>:<available_to_joined_by_comma>:<signed_by>:<value>:<deleted>`.
    pub fn canonical_string(&self, secret_key: &str) -> String {
        format!(
            "value:{}:{}:{}:{}:{}:{}",
            format_timestamp(&self.added_at),
            secret_key,
            self.available_to.join(","),
            self.signed_by,
            self.value,
            self.deleted
        )
    }

    /// Build a signed value for `secret_key` encrypted to `available_to`.
    ///
    /// The recipient list is sorted lexicographically before signing so
    /// the canonical string is stable regardless of input order.
    pub fn create(
        crypto: &dyn VaultCrypto,
        signer: &Identity,
        secret_key: &str,
        mut available_to: Vec<String>,
        ciphertext: String,
    ) -> Result<Self> {
        available_to.sort();
        Self::seal(crypto, signer, secret_key, available_to, ciphertext, false)
    }

    /// Build a signed deletion marker: `deleted=true`, empty recipients,
    /// empty ciphertext.
    pub fn deletion_marker(
        crypto: &dyn VaultCrypto,
        signer: &Identity,
        secret_key: &str,
    ) -> Result<Self> {
        Self::seal(crypto, signer, secret_key, Vec::new(), String::new(), true)
    }

    fn seal(
        crypto: &dyn VaultCrypto,
        signer: &Identity,
        secret_key: &str,
        available_to: Vec<String>,
        ciphertext: String,
        deleted: bool,
    ) -> Result<Self> {
        let mut value = Self {
            added_at: Utc::now(),
            available_to,
            value: ciphertext,
            deleted,
            hash: String::new(),
            signed_by: signer.fingerprint.clone(),
            signature: String::new(),
        };
        value.hash = crypto.hash(
            value.canonical_string(secret_key).as_bytes(),
            signer.algorithm.hash_strength(),
        )?;
        value.signature = crypto.sign(&signer.fingerprint, &value.hash)?;
        Ok(value)
    }

    /// Whether this value is a deletion marker.
    pub fn is_deletion_marker(&self) -> bool {
        self.deleted
    }

    /// Whether `fingerprint` may decrypt this value.
    pub fn available_to_contains(&self, fingerprint: &str) -> bool {
        self.available_to.iter().any(|fp| fp == fingerprint)
    }

    /// Two-step verification, as for secrets.
    pub fn verify(
        &self,
        crypto: &dyn VaultCrypto,
        signer: &Identity,
        secret_key: &str,
    ) -> Result<()> {
        let computed = crypto.hash(
            self.canonical_string(secret_key).as_bytes(),
            signer.algorithm.hash_strength(),
        )?;
        if computed != self.hash {
            return Err(SecLedgerError::HashMismatch(format!(
                "value of '{secret_key}' added at {}",
                format_timestamp(&self.added_at)
            )));
        }
        if crypto.verify(&signer.public_key, &self.hash, &self.signature)? {
            Ok(())
        } else {
            Err(SecLedgerError::SignatureInvalid {
                subject: format!("value of '{secret_key}'"),
                signed_by: self.signed_by.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One data line: the record type discriminant plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    Identity { data: Identity },
    Secret { data: Secret },
    Value { secret: String, data: SecretValue },
}

impl Entry {
    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SecLedgerError::Serialization(e.to_string()))
    }

    /// Parse one data line.  `line_no` is the 1-indexed file line, used
    /// only for the error message.
    pub fn parse(line: &str, line_no: usize) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| SecLedgerError::MalformedEntry {
            line: line_no,
            reason: e.to_string(),
        })
    }

    /// The record type name as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Entry::Identity { .. } => "identity",
            Entry::Secret { .. } => "secret",
            Entry::Value { .. } => "value",
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for RFC3339-nanosecond timestamps
// ---------------------------------------------------------------------------

pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod timestamp_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => serializer.serialize_some(&super::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
