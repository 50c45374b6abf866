//! Secret-key parsing and canonicalisation.
//!
//! A secret key is either `namespace::NAME` or a bare `NAME`.  The
//! namespace is lowercased, the name uppercased, and the canonical
//! spelling is what gets stored on disk.  Lookups fall back to raw
//! case-insensitive comparison so vaults written before the rules
//! tightened stay readable.

use crate::errors::{Result, SecLedgerError};

/// The namespace/name separator. Exactly two colons; any other colon
/// usage is rejected.
const SEPARATOR: &str = "::";

/// A parsed and normalised secret key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretKey {
    namespace: Option<String>,
    name: String,
}

impl SecretKey {
    /// Parse a raw key string into its normalised form.
    ///
    /// Normalisation happens before validation: the namespace is
    /// lowercased and the name uppercased, then each part is checked
    /// against the character rules.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid(raw, "key is empty"));
        }

        let (namespace, name) = match raw.matches(SEPARATOR).count() {
            0 => {
                if raw.contains(':') {
                    return Err(invalid(raw, "single ':' is not a valid separator (use '::')"));
                }
                (None, raw.to_ascii_uppercase())
            }
            1 => {
                // split_once is safe here: we counted exactly one occurrence.
                let (ns, name) = raw.split_once(SEPARATOR).unwrap();
                if ns.contains(':') || name.contains(':') {
                    return Err(invalid(raw, "stray ':' outside the '::' separator"));
                }
                (Some(ns.to_ascii_lowercase()), name.to_ascii_uppercase())
            }
            _ => return Err(invalid(raw, "more than one '::' separator")),
        };

        if let Some(ref ns) = namespace {
            validate_part(raw, ns, true)?;
        }
        validate_part(raw, &name, false)?;

        Ok(Self { namespace, name })
    }

    /// The canonical string form: `namespace::NAME` or `NAME`.
    pub fn to_canonical(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}{SEPARATOR}{}", self.name),
            None => self.name.clone(),
        }
    }

    /// The namespace part, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The name part.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best-effort key equality for lookups.
    ///
    /// Both sides are normalised when possible and compared in canonical
    /// form; if either side fails to parse (legacy keys written before
    /// validation existed), the comparison degrades to raw
    /// case-insensitive equality.
    pub fn lookup_matches(stored: &str, query: &str) -> bool {
        match (SecretKey::parse(stored), SecretKey::parse(query)) {
            (Ok(a), Ok(b)) => a == b,
            _ => stored.eq_ignore_ascii_case(query),
        }
    }

    /// Normalise a raw key to its canonical string, or fall back to the
    /// raw input when it cannot be parsed.
    pub fn canonicalize_lossy(raw: &str) -> String {
        SecretKey::parse(raw)
            .map(|k| k.to_canonical())
            .unwrap_or_else(|_| raw.to_string())
    }
}

impl std::fmt::Display for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl std::str::FromStr for SecretKey {
    type Err = SecLedgerError;

    fn from_str(s: &str) -> Result<Self> {
        SecretKey::parse(s)
    }
}

fn invalid(key: &str, reason: &str) -> SecLedgerError {
    SecLedgerError::InvalidSecretKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate one normalised part (namespace or name).
fn validate_part(raw: &str, part: &str, is_namespace: bool) -> Result<()> {
    let label = if is_namespace { "namespace" } else { "name" };

    if part.is_empty() {
        return Err(invalid(raw, &format!("{label} is empty")));
    }
    if !part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid(
            raw,
            &format!("{label} may contain only letters, digits, and underscores"),
        ));
    }
    if !part.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(invalid(raw, &format!("{label} must contain at least one letter")));
    }
    if is_namespace {
        let first = part.chars().next().unwrap();
        if first.is_ascii_digit() || first == '_' {
            return Err(invalid(
                raw,
                "namespace must not start with a digit or underscore",
            ));
        }
    }
    if part.ends_with('_') {
        return Err(invalid(raw, &format!("{label} must not end with an underscore")));
    }
    if part.contains("___") {
        return Err(invalid(
            raw,
            &format!("{label} must not contain three or more consecutive underscores"),
        ));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_uppercases() {
        let key = SecretKey::parse("db_password").unwrap();
        assert_eq!(key.to_canonical(), "DB_PASSWORD");
        assert!(key.namespace().is_none());
    }

    #[test]
    fn namespaced_key_normalises_both_parts() {
        let key = SecretKey::parse("Prod::db_password").unwrap();
        assert_eq!(key.to_canonical(), "prod::DB_PASSWORD");
        assert_eq!(key.namespace(), Some("prod"));
        assert_eq!(key.name(), "DB_PASSWORD");
    }

    #[test]
    fn canonicalisation_is_idempotent() {
        for raw in ["prod::api_key", "API_KEY", "Infra::TLS_CERT", "a1b"] {
            let once = SecretKey::parse(raw).unwrap().to_canonical();
            let twice = SecretKey::parse(&once).unwrap().to_canonical();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn rejects_multiple_separators() {
        assert!(SecretKey::parse("a::b::c").is_err());
    }

    #[test]
    fn rejects_single_colon() {
        assert!(SecretKey::parse("a:b").is_err());
        assert!(SecretKey::parse("ns:::NAME").is_err());
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(SecretKey::parse("").is_err());
        assert!(SecretKey::parse("::NAME").is_err());
        assert!(SecretKey::parse("ns::").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(SecretKey::parse("my-key").is_err());
        assert!(SecretKey::parse("ns::NA ME").is_err());
        assert!(SecretKey::parse("ns::NAME!").is_err());
    }

    #[test]
    fn rejects_purely_numeric_parts() {
        assert!(SecretKey::parse("12345").is_err());
        assert!(SecretKey::parse("123::NAME").is_err());
        assert!(SecretKey::parse("ns::42").is_err());
    }

    #[test]
    fn namespace_must_not_start_with_digit_or_underscore() {
        assert!(SecretKey::parse("1ns::NAME").is_err());
        assert!(SecretKey::parse("_ns::NAME").is_err());
        // The start rule applies to the namespace only.
        assert!(SecretKey::parse("ns::_NAME").is_ok());
        assert!(SecretKey::parse("ns::9LIVES").is_ok());
    }

    #[test]
    fn rejects_trailing_underscore() {
        assert!(SecretKey::parse("ns_::NAME").is_err());
        assert!(SecretKey::parse("ns::NAME_").is_err());
    }

    #[test]
    fn rejects_triple_underscore_runs() {
        assert!(SecretKey::parse("a___b").is_err());
        assert!(SecretKey::parse("ns::A____B").is_err());
        assert!(SecretKey::parse("a__b").is_ok());
    }

    #[test]
    fn lookup_matches_normalised_keys() {
        assert!(SecretKey::lookup_matches("prod::API_KEY", "PROD::api_key"));
        assert!(SecretKey::lookup_matches("API_KEY", "api_key"));
        assert!(!SecretKey::lookup_matches("prod::API_KEY", "dev::API_KEY"));
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive_raw_equality() {
        // Neither side parses (hyphen is invalid) — raw comparison applies.
        assert!(SecretKey::lookup_matches("legacy-key", "LEGACY-KEY"));
        assert!(!SecretKey::lookup_matches("legacy-key", "other-key"));
    }

    #[test]
    fn display_uses_canonical_form() {
        let key: SecretKey = "Ns::Value_Name".parse().unwrap();
        assert_eq!(key.to_string(), "ns::VALUE_NAME");
    }
}
