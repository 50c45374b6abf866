//! Fragmentation analysis and canonical rewrite.
//!
//! Append-only files drift: a secret's definition and its values end up
//! scattered between unrelated records, and superseded lines accumulate.
//! The fragmentation ratio combines two signals in [0, 1]:
//!
//! - the wasted-line ratio: data lines beyond the minimum needed for
//!   the current entries (stray comments, junk left by older tools);
//! - the average per-secret spread: how far apart a secret's definition
//!   and value lines sit, beyond the contiguous minimum, normalised by
//!   total entries.
//!
//! Defragmenting rewrites the file in canonical order: identities by
//! `added_at`, secrets by key, each secret's values by `added_at`, each
//! value's recipient set lexicographically.

use log::info;

use super::header::{Header, PREAMBLE_LINES};
use super::Vault;

/// Entry counts below this never warrant a rewrite.
const MIN_ENTRIES: usize = 500;

/// Above this entry count the recommendation threshold tightens.
const LARGE_VAULT_ENTRIES: usize = 2000;

/// Ratio threshold for mid-sized vaults (500..=2000 entries).
const MID_THRESHOLD: f64 = 0.4;

/// Ratio threshold for large vaults (> 2000 entries).
const LARGE_THRESHOLD: f64 = 0.3;

/// Fragmentation metrics for one vault file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentationStats {
    /// Records the header points at.
    pub total_entries: usize,
    /// Lines after the preamble.
    pub data_lines: usize,
    /// Data lines not referenced by any header entry.
    pub wasted_lines: usize,
    /// Secrets whose lines are not contiguous.
    pub fragmented_secrets: usize,
    /// Largest per-secret spread observed.
    pub max_spread: usize,
    /// Combined metric in [0, 1].
    pub fragmentation_ratio: f64,
}

impl FragmentationStats {
    /// Whether a rewrite is worth recommending for these numbers.
    pub fn should_defragment(&self) -> bool {
        if self.total_entries < MIN_ENTRIES {
            return false;
        }
        let threshold = if self.total_entries > LARGE_VAULT_ENTRIES {
            LARGE_THRESHOLD
        } else {
            MID_THRESHOLD
        };
        self.fragmentation_ratio > threshold
    }
}

/// Compute fragmentation metrics from a header and the file's total
/// line count.
pub fn analyze(header: &Header, total_lines: usize) -> FragmentationStats {
    let total_entries = header.entry_count();
    let data_lines = total_lines.saturating_sub(PREAMBLE_LINES);
    let wasted_lines = data_lines.saturating_sub(total_entries);

    let mut spread_sum = 0usize;
    let mut max_spread = 0usize;
    let mut fragmented_secrets = 0usize;
    let secret_count = header.secrets().len();

    for index in header.secrets().values() {
        let mut min_line = index.secret;
        let mut max_line = index.secret;
        for line in &index.values {
            min_line = min_line.min(*line);
            max_line = max_line.max(*line);
        }
        let count = 1 + index.values.len();
        let spread = (max_line - min_line).saturating_sub(count - 1);

        spread_sum += spread;
        max_spread = max_spread.max(spread);
        if spread > 0 {
            fragmented_secrets += 1;
        }
    }

    let wasted_ratio = if data_lines == 0 {
        0.0
    } else {
        wasted_lines as f64 / data_lines as f64
    };
    let avg_spread = if secret_count == 0 || total_entries == 0 {
        0.0
    } else {
        (spread_sum as f64 / secret_count as f64) / total_entries as f64
    };

    let fragmentation_ratio = (0.5 * wasted_ratio + 0.5 * avg_spread).clamp(0.0, 1.0);

    FragmentationStats {
        total_entries,
        data_lines,
        wasted_lines,
        fragmented_secrets,
        max_spread,
        fragmentation_ratio,
    }
}

/// Sort a vault into canonical rewrite order.
pub fn canonical_order(vault: &mut Vault) {
    vault.identities.sort_by_key(|id| id.added_at);
    vault.secrets.sort_by(|a, b| a.key.cmp(&b.key));
    for secret in &mut vault.secrets {
        secret.values.sort_by_key(|v| v.added_at);
        for value in &mut secret.values {
            value.available_to.sort();
        }
    }
    info!(
        "canonical order: {} identities, {} secrets",
        vault.identities.len(),
        vault.secrets.len()
    );
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::memory::MemoryCrypto;
    use crate::crypto::Algorithm;
    use crate::vault::entry::{Identity, Secret, SecretValue};
    use crate::vault::header::LATEST_VERSION;

    const FP: &str = "7777777777777777777777777777777777777777";

    fn contiguous_header(secrets: usize, values_each: usize) -> Header {
        let mut header = Header::new(LATEST_VERSION);
        let mut line = PREAMBLE_LINES;
        for i in 0..secrets {
            let key = format!("KEY{i}");
            line += 1;
            header.add_secret(&key, line);
            for _ in 0..values_each {
                line += 1;
                header.add_value(&key, line).unwrap();
            }
        }
        header
    }

    #[test]
    fn contiguous_vault_has_zero_ratio() {
        let header = contiguous_header(10, 3);
        let stats = analyze(&header, PREAMBLE_LINES + 40);
        assert_eq!(stats.total_entries, 40);
        assert_eq!(stats.wasted_lines, 0);
        assert_eq!(stats.fragmented_secrets, 0);
        assert_eq!(stats.max_spread, 0);
        assert_eq!(stats.fragmentation_ratio, 0.0);
    }

    #[test]
    fn interleaved_secrets_show_spread() {
        // Two secrets with their values interleaved:
        // line 4: def A, 5: def B, 6: val A, 7: val B.
        let mut header = Header::new(LATEST_VERSION);
        header.add_secret("A", 4);
        header.add_secret("B", 5);
        header.add_value("A", 6).unwrap();
        header.add_value("B", 7).unwrap();

        let stats = analyze(&header, 7);
        assert_eq!(stats.fragmented_secrets, 2);
        assert_eq!(stats.max_spread, 1);
        assert!(stats.fragmentation_ratio > 0.0);
    }

    #[test]
    fn unreferenced_lines_count_as_waste() {
        let header = contiguous_header(1, 1);
        // Two extra lines beyond the referenced records.
        let stats = analyze(&header, PREAMBLE_LINES + 4);
        assert_eq!(stats.wasted_lines, 2);
        assert!(stats.fragmentation_ratio > 0.0);
    }

    #[test]
    fn small_vaults_are_never_recommended() {
        let stats = FragmentationStats {
            total_entries: MIN_ENTRIES - 1,
            data_lines: 1000,
            wasted_lines: 500,
            fragmented_secrets: 10,
            max_spread: 100,
            fragmentation_ratio: 0.9,
        };
        assert!(!stats.should_defragment());
    }

    #[test]
    fn thresholds_tighten_with_size() {
        let mid = |ratio| FragmentationStats {
            total_entries: 1000,
            data_lines: 1000,
            wasted_lines: 0,
            fragmented_secrets: 0,
            max_spread: 0,
            fragmentation_ratio: ratio,
        };
        assert!(!mid(0.35).should_defragment());
        assert!(mid(0.45).should_defragment());

        let large = |ratio| FragmentationStats {
            total_entries: 5000,
            ..mid(ratio)
        };
        assert!(large(0.35).should_defragment());
        assert!(!large(0.25).should_defragment());
    }

    #[test]
    fn canonical_order_sorts_everything() {
        let crypto = MemoryCrypto::with_keys([FP]);
        let alice = Identity::self_signed(
            &crypto,
            FP,
            &MemoryCrypto::public_key_for(FP),
            Algorithm::new("ed25519", 256),
            "Alice",
        )
        .unwrap();

        let mut zeta = Secret::create(&crypto, &alice, "ZETA").unwrap();
        zeta.values.push(
            SecretValue::create(&crypto, &alice, "ZETA", vec![FP.into()], "YQ==".into()).unwrap(),
        );
        let alpha = Secret::create(&crypto, &alice, "ALPHA").unwrap();

        let mut vault = Vault {
            identities: vec![alice],
            secrets: vec![zeta, alpha],
        };
        canonical_order(&mut vault);

        assert_eq!(vault.secrets[0].key, "ALPHA");
        assert_eq!(vault.secrets[1].key, "ZETA");
    }
}
