//! Versioned header codec.
//!
//! Line 2 of every vault file is a single JSON object mapping entities
//! to their on-disk line numbers:
//!
//! ```text
//! v1: {"version":1,"identities":[["<fp>",4],["<fp>",7]],"secrets":{...}}
//! v2: {"version":2,"identities":{"<fp>":4},"secrets":{...}}
//! ```
//!
//! Both versions share the secrets shape
//! `{"<key>": {"secret": <defLine>, "values": [<line>, ...]}}`.
//! Marshalling and unmarshalling dispatch through a version table so
//! both formats stay live side by side.  Line numbers are 1-indexed and
//! count the three preamble lines.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{Result, SecLedgerError};
use crate::key::SecretKey;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Comment marker identifying a vault file (line 1).
pub const HEADER_MARKER: &str = "# === VAULT HEADER ===";

/// Comment marker separating the header from data records (line 3).
pub const DATA_MARKER: &str = "# === VAULT DATA ===";

/// The current header format version.
pub const LATEST_VERSION: u32 = 2;

/// Oldest version the codec still reads.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Number of preamble lines (marker, header JSON, data marker).
pub const PREAMBLE_LINES: usize = 3;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Line locations of one secret: its definition record and its value
/// records in append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretIndex {
    pub secret: usize,
    pub values: Vec<usize>,
}

/// The in-memory header: format version plus the two line maps.
///
/// Identities keep their insertion (line) order; secrets are keyed by
/// their stored canonical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    version: u32,
    identities: Vec<(String, usize)>,
    secrets: BTreeMap<String, SecretIndex>,
}

impl Header {
    /// An empty header at the given format version.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            identities: Vec::new(),
            secrets: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    /// Identities as `(fingerprint, line)` pairs ordered by line number.
    pub fn identities(&self) -> &[(String, usize)] {
        &self.identities
    }

    /// Secrets keyed by stored canonical key.
    pub fn secrets(&self) -> &BTreeMap<String, SecretIndex> {
        &self.secrets
    }

    /// Line number of an identity record, exact fingerprint match.
    pub fn identity_line(&self, fingerprint: &str) -> Option<usize> {
        self.identities
            .iter()
            .find(|(fp, _)| fp == fingerprint)
            .map(|(_, line)| *line)
    }

    /// Look up a secret by key, tolerating case and legacy spellings.
    ///
    /// Returns the stored key alongside the index so callers can use the
    /// exact on-disk spelling for value records.
    pub fn secret_entry(&self, key: &str) -> Option<(&str, &SecretIndex)> {
        self.secrets
            .iter()
            .find(|(stored, _)| SecretKey::lookup_matches(stored, key))
            .map(|(stored, index)| (stored.as_str(), index))
    }

    pub fn has_identity(&self, fingerprint: &str) -> bool {
        self.identity_line(fingerprint).is_some()
    }

    pub fn has_secret(&self, key: &str) -> bool {
        self.secret_entry(key).is_some()
    }

    /// Record an identity at `line`.  The caller checks for duplicates.
    pub fn add_identity(&mut self, fingerprint: &str, line: usize) {
        self.identities.push((fingerprint.to_string(), line));
    }

    /// Record a secret definition at `line` with an empty value list.
    pub fn add_secret(&mut self, key: &str, line: usize) {
        self.secrets.insert(
            key.to_string(),
            SecretIndex {
                secret: line,
                values: Vec::new(),
            },
        );
    }

    /// Append a value line to a secret's list.
    pub fn add_value(&mut self, key: &str, line: usize) -> Result<()> {
        let stored = self
            .secret_entry(key)
            .map(|(stored, _)| stored.to_string())
            .ok_or_else(|| SecLedgerError::SecretNotFound(key.to_string()))?;
        self.secrets
            .get_mut(&stored)
            .expect("secret_entry returned a live key")
            .values
            .push(line);
        Ok(())
    }

    /// Total number of records the header points at.
    pub fn entry_count(&self) -> usize {
        self.identities.len()
            + self
                .secrets
                .values()
                .map(|idx| 1 + idx.values.len())
                .sum::<usize>()
    }

    // ------------------------------------------------------------------
    // Marshal / unmarshal (version dispatch)
    // ------------------------------------------------------------------

    /// Serialize at `self.version` into a single JSON line.
    pub fn marshal(&self) -> Result<String> {
        let (_, marshal, _) = format_for(self.version)?;
        marshal(self)
    }

    /// Parse a header line, dispatching on its `version` field.
    pub fn unmarshal(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| SecLedgerError::MalformedHeader(e.to_string()))?;
        let version = version_of(&value)?;
        let (_, _, unmarshal) = format_for(version)?;
        let header = unmarshal(version, &value)?;
        header.check_line_consistency()?;
        Ok(header)
    }

    /// Read the version from a header line without fully parsing it.
    pub fn detect_version(line: &str) -> Result<u32> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| SecLedgerError::MalformedHeader(e.to_string()))?;
        version_of(&value)
    }

    /// Every line number must be claimed by exactly one record.
    fn check_line_consistency(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut claim = |line: usize| -> Result<()> {
            if line <= PREAMBLE_LINES {
                return Err(SecLedgerError::MalformedHeader(format!(
                    "line {line} is inside the preamble"
                )));
            }
            if !seen.insert(line) {
                return Err(SecLedgerError::MalformedHeader(format!(
                    "line {line} is referenced more than once"
                )));
            }
            Ok(())
        };

        for (_, line) in &self.identities {
            claim(*line)?;
        }
        for index in self.secrets.values() {
            claim(index.secret)?;
            for line in &index.values {
                claim(*line)?;
            }
        }
        Ok(())
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(LATEST_VERSION)
    }
}

// ---------------------------------------------------------------------------
// Format table
// ---------------------------------------------------------------------------

type MarshalFn = fn(&Header) -> Result<String>;
type UnmarshalFn = fn(u32, &Value) -> Result<Header>;

/// Version → (marshal, unmarshal).  Adding a format is one table row.
const FORMATS: &[(u32, MarshalFn, UnmarshalFn)] = &[
    (1, marshal_v1, unmarshal_v1),
    (2, marshal_v2, unmarshal_v2),
];

fn format_for(version: u32) -> Result<&'static (u32, MarshalFn, UnmarshalFn)> {
    FORMATS
        .iter()
        .find(|(v, _, _)| *v == version)
        .ok_or(SecLedgerError::UnsupportedVersion {
            found: version,
            latest: LATEST_VERSION,
        })
}

fn version_of(value: &Value) -> Result<u32> {
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            SecLedgerError::MalformedHeader("missing or non-numeric 'version' field".into())
        })? as u32;

    if version < MIN_SUPPORTED_VERSION {
        return Err(SecLedgerError::VersionBelowMinimum {
            found: version,
            minimum: MIN_SUPPORTED_VERSION,
        });
    }
    Ok(version)
}

fn secrets_value(header: &Header) -> Result<Value> {
    serde_json::to_value(&header.secrets).map_err(|e| SecLedgerError::Serialization(e.to_string()))
}

fn secrets_from(value: &Value) -> Result<BTreeMap<String, SecretIndex>> {
    let secrets = value.get("secrets").cloned().unwrap_or_else(|| json!({}));
    serde_json::from_value(secrets)
        .map_err(|e| SecLedgerError::MalformedHeader(format!("secrets map: {e}")))
}

// v1: identities as an ordered array of [fingerprint, line] pairs.
fn marshal_v1(header: &Header) -> Result<String> {
    let mut pairs = header.identities.to_vec();
    pairs.sort_by_key(|(_, line)| *line);

    let value = json!({
        "version": 1,
        "identities": pairs,
        "secrets": secrets_value(header)?,
    });
    serde_json::to_string(&value).map_err(|e| SecLedgerError::Serialization(e.to_string()))
}

fn unmarshal_v1(version: u32, value: &Value) -> Result<Header> {
    let identities = value.get("identities").cloned().unwrap_or_else(|| json!([]));
    let mut identities: Vec<(String, usize)> = serde_json::from_value(identities)
        .map_err(|e| SecLedgerError::MalformedHeader(format!("identities array: {e}")))?;
    identities.sort_by_key(|(_, line)| *line);

    Ok(Header {
        version,
        identities,
        secrets: secrets_from(value)?,
    })
}

// v2: identities as a {fingerprint: line} object.
fn marshal_v2(header: &Header) -> Result<String> {
    let identities: BTreeMap<&str, usize> = header
        .identities
        .iter()
        .map(|(fp, line)| (fp.as_str(), *line))
        .collect();

    let value = json!({
        "version": 2,
        "identities": identities,
        "secrets": secrets_value(header)?,
    });
    serde_json::to_string(&value).map_err(|e| SecLedgerError::Serialization(e.to_string()))
}

fn unmarshal_v2(version: u32, value: &Value) -> Result<Header> {
    let identities = value.get("identities").cloned().unwrap_or_else(|| json!({}));
    let identities: BTreeMap<String, usize> = serde_json::from_value(identities)
        .map_err(|e| SecLedgerError::MalformedHeader(format!("identities object: {e}")))?;

    // The object has no order of its own; line numbers restore it.
    let mut identities: Vec<(String, usize)> = identities.into_iter().collect();
    identities.sort_by_key(|(_, line)| *line);

    Ok(Header {
        version,
        identities,
        secrets: secrets_from(value)?,
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(version: u32) -> Header {
        let mut header = Header::new(version);
        header.add_identity("a".repeat(40).as_str(), 4);
        header.add_identity("b".repeat(40).as_str(), 5);
        header.add_secret("prod::DB_URL", 6);
        header.add_value("prod::DB_URL", 7).unwrap();
        header.add_value("prod::DB_URL", 9).unwrap();
        header.add_secret("API_KEY", 8);
        header
    }

    #[test]
    fn v1_roundtrip_preserves_identity_order() {
        let header = sample_header(1);
        let line = header.marshal().unwrap();
        assert!(line.contains("\"version\":1"));
        // v1 stores identities as an array of pairs.
        assert!(line.contains(&format!("[\"{}\",4]", "a".repeat(40))));

        let parsed = Header::unmarshal(&line).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn v2_roundtrip_restores_order_from_lines() {
        let header = sample_header(2);
        let line = header.marshal().unwrap();
        assert!(line.contains("\"version\":2"));
        // v2 stores identities as an object.
        assert!(line.contains(&format!("\"{}\":4", "a".repeat(40))));

        let parsed = Header::unmarshal(&line).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn secrets_shape_is_shared_between_versions() {
        for version in [1, 2] {
            let line = sample_header(version).marshal().unwrap();
            assert!(line.contains("\"prod::DB_URL\":{\"secret\":6,\"values\":[7,9]}"));
        }
    }

    #[test]
    fn version_below_minimum_is_refused() {
        let err = Header::unmarshal(r#"{"version":0,"identities":{},"secrets":{}}"#).unwrap_err();
        assert_eq!(err.code(), "format/version-below-minimum");
    }

    #[test]
    fn unknown_future_version_is_refused() {
        let err = Header::unmarshal(r#"{"version":9,"identities":{},"secrets":{}}"#).unwrap_err();
        assert_eq!(err.code(), "format/unsupported-version");
    }

    #[test]
    fn missing_version_field_is_malformed() {
        let err = Header::unmarshal(r#"{"identities":{},"secrets":{}}"#).unwrap_err();
        assert_eq!(err.code(), "format/malformed-header");
    }

    #[test]
    fn malformed_json_is_a_hard_error() {
        assert!(Header::unmarshal("not json at all").is_err());
    }

    #[test]
    fn duplicate_line_reference_is_rejected() {
        let line = r#"{"version":2,"identities":{"aa":4},"secrets":{"K":{"secret":4,"values":[]}}}"#;
        let err = Header::unmarshal(line).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn preamble_line_reference_is_rejected() {
        let line = r#"{"version":2,"identities":{"aa":2},"secrets":{}}"#;
        assert!(Header::unmarshal(line).is_err());
    }

    #[test]
    fn secret_lookup_is_case_insensitive() {
        let header = sample_header(2);
        assert!(header.has_secret("PROD::db_url"));
        assert!(header.has_secret("api_key"));
        assert!(!header.has_secret("prod::MISSING"));

        let (stored, index) = header.secret_entry("prod::db_url").unwrap();
        assert_eq!(stored, "prod::DB_URL");
        assert_eq!(index.secret, 6);
        assert_eq!(index.values, vec![7, 9]);
    }

    #[test]
    fn entry_count_counts_definitions_and_values() {
        // 2 identities + 2 definitions + 2 values.
        assert_eq!(sample_header(2).entry_count(), 6);
    }

    #[test]
    fn detect_version_reads_only_the_version_field() {
        assert_eq!(
            Header::detect_version(r#"{"version":1,"identities":[]}"#).unwrap(),
            1
        );
        assert_eq!(
            Header::detect_version(r#"{"version":2,"identities":{}}"#).unwrap(),
            2
        );
    }
}
