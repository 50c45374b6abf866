//! Indexed append-only vault writer.
//!
//! The writer owns the full in-memory lines vector and the header.
//! Every public operation appends exactly the records it names, updates
//! the header's line maps, and atomically rewrites the file:
//!
//! 1. serialize the header for the writer's format version into line 2;
//! 2. write every line plus `\n` to `<path>.tmp` (created 0600);
//! 3. flush, fsync, close;
//! 4. rename the temp file over the vault path;
//! 5. reapply the pre-rewrite permission bits and (Unix) owner.
//!
//! On any error before the rename the temp file is deleted; readers
//! never observe a half-written vault.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use log::debug;

use super::entry::{Entry, Identity, Secret, SecretValue};
use super::header::{
    Header, DATA_MARKER, HEADER_MARKER, LATEST_VERSION, PREAMBLE_LINES,
};
use super::Vault;
use crate::errors::{Result, SecLedgerError};
use crate::key::SecretKey;

/// Append-only writer over one vault file.
pub struct Writer {
    path: PathBuf,
    version: u32,
    header: Header,
    /// Whole file, one string per line, preamble included.
    lines: Vec<String>,
    read_only: bool,
}

impl Writer {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Load a vault read-write, creating the file (and its parent
    /// directory, mode 0700) when absent.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_mode(path, false)
    }

    /// Load a vault for reading only, as used under shared locks.
    /// Absent or truncated files become empty in-memory vaults; nothing
    /// is created or repaired on disk.
    pub fn load_read_only(path: &Path) -> Result<Self> {
        Self::load_with_mode(path, true)
    }

    fn load_with_mode(path: &Path, read_only: bool) -> Result<Self> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if len == 0 {
            let mut writer = Self::empty(path, read_only);
            if !read_only {
                writer.create_file()?;
            }
            return Ok(writer);
        }

        let content = fs::read_to_string(path)?;
        let lines: Vec<String> = content.lines().map(String::from).collect();

        if lines.len() < PREAMBLE_LINES {
            // A truncated preamble cannot be appended to safely.
            let mut writer = Self::empty(path, read_only);
            if !read_only {
                debug!("recreating truncated vault file {}", path.display());
                writer.create_file()?;
            }
            return Ok(writer);
        }

        if lines[0] != HEADER_MARKER {
            return Err(SecLedgerError::UnknownMarker(path.to_path_buf()));
        }
        if lines[2] != DATA_MARKER {
            return Err(SecLedgerError::MalformedHeader(format!(
                "{} is missing the data marker on line 3",
                path.display()
            )));
        }

        let header = Header::unmarshal(&lines[1])?;
        let version = header.version();

        Ok(Self {
            path: path.to_path_buf(),
            version,
            header,
            lines,
            read_only,
        })
    }

    fn empty(path: &Path, read_only: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            version: LATEST_VERSION,
            header: Header::new(LATEST_VERSION),
            lines: vec![
                HEADER_MARKER.to_string(),
                String::new(), // placeholder, filled on flush
                DATA_MARKER.to_string(),
            ],
            read_only,
        }
    }

    /// Write the initial three-line preamble for a brand-new vault.
    fn create_file(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_private_dir(parent)?;
            }
        }
        self.flush()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Total line count, preamble included.
    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    // ------------------------------------------------------------------
    // Append operations
    // ------------------------------------------------------------------

    /// Append an identity record.  Duplicate fingerprints are rejected.
    pub fn add_identity(&mut self, identity: &Identity) -> Result<()> {
        self.ensure_writable()?;
        if self.header.has_identity(&identity.fingerprint) {
            return Err(SecLedgerError::DuplicateIdentity(
                identity.fingerprint.clone(),
            ));
        }

        let line = self.append_entry(&Entry::Identity {
            data: identity.clone(),
        })?;
        self.header.add_identity(&identity.fingerprint, line);
        self.flush()
    }

    /// Append a secret definition with an empty value list.  Any
    /// case-insensitive key match counts as a duplicate.
    pub fn add_secret(&mut self, secret: &Secret) -> Result<()> {
        self.ensure_writable()?;
        if self.header.has_secret(&secret.key) {
            return Err(SecLedgerError::DuplicateSecret(secret.key.clone()));
        }

        let line = self.append_entry(&Entry::Secret {
            data: secret.clone(),
        })?;
        self.header.add_secret(&secret.key, line);
        self.flush()
    }

    /// Append one value record to an existing secret.
    pub fn add_secret_value(&mut self, key: &str, value: &SecretValue) -> Result<()> {
        self.ensure_writable()?;
        let stored = self
            .header
            .secret_entry(key)
            .map(|(stored, _)| stored.to_string())
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))?;

        let line = self.append_entry(&Entry::Value {
            secret: stored.clone(),
            data: value.clone(),
        })?;
        self.header.add_value(&stored, line)?;
        self.flush()
    }

    /// Append a secret definition followed by all of its values, in one
    /// atomic rewrite.
    pub fn add_secret_with_values(&mut self, secret: &Secret) -> Result<()> {
        self.ensure_writable()?;
        if self.header.has_secret(&secret.key) {
            return Err(SecLedgerError::DuplicateSecret(secret.key.clone()));
        }

        let line = self.append_entry(&Entry::Secret {
            data: secret.clone(),
        })?;
        self.header.add_secret(&secret.key, line);

        for value in &secret.values {
            let line = self.append_entry(&Entry::Value {
                secret: secret.key.clone(),
                data: value.clone(),
            })?;
            self.header.add_value(&secret.key, line)?;
        }
        self.flush()
    }

    /// Replace the whole file with the given vault's contents, written
    /// in the vault's own order: identities first, then each secret's
    /// definition followed by its values.  Used by defragmentation and
    /// format upgrades.
    pub fn rewrite_from_vault(&mut self, vault: &Vault, version: Option<u32>) -> Result<()> {
        self.ensure_writable()?;
        let version = version.unwrap_or(self.version);

        let mut header = Header::new(version);
        let mut lines = vec![
            HEADER_MARKER.to_string(),
            String::new(),
            DATA_MARKER.to_string(),
        ];

        for identity in &vault.identities {
            lines.push(
                Entry::Identity {
                    data: identity.clone(),
                }
                .to_line()?,
            );
            header.add_identity(&identity.fingerprint, lines.len());
        }
        for secret in &vault.secrets {
            lines.push(
                Entry::Secret {
                    data: secret.clone(),
                }
                .to_line()?,
            );
            header.add_secret(&secret.key, lines.len());

            for value in &secret.values {
                lines.push(
                    Entry::Value {
                        secret: secret.key.clone(),
                        data: value.clone(),
                    }
                    .to_line()?,
                );
                header.add_value(&secret.key, lines.len())?;
            }
        }

        self.header = header;
        self.lines = lines;
        self.version = version;
        self.flush()
    }

    fn append_entry(&mut self, entry: &Entry) -> Result<usize> {
        self.lines.push(entry.to_line()?);
        Ok(self.lines.len())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(SecLedgerError::ReadOnlyVault(self.path.clone()))
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Full read
    // ------------------------------------------------------------------

    /// Materialise the complete vault from the in-memory lines, with
    /// each secret's values attached in append order.  Secrets come out
    /// in definition-line order, identities in line order.
    pub fn read_vault(&self) -> Result<Vault> {
        let total = self.lines.len();
        let line_at = |line: usize| -> Result<&str> {
            if line == 0 || line > total {
                return Err(SecLedgerError::InvalidLineReference { line, total });
            }
            Ok(self.lines[line - 1].as_str())
        };

        let mut vault = Vault::new();

        for (_, line) in self.header.identities() {
            match Entry::parse(line_at(*line)?, *line)? {
                Entry::Identity { data } => vault.identities.push(data),
                other => {
                    return Err(SecLedgerError::MalformedEntry {
                        line: *line,
                        reason: format!("expected an identity record, found {}", other.kind()),
                    })
                }
            }
        }

        let mut secrets: Vec<(usize, Secret)> = Vec::new();
        for index in self.header.secrets().values() {
            let mut secret = match Entry::parse(line_at(index.secret)?, index.secret)? {
                Entry::Secret { data } => data,
                other => {
                    return Err(SecLedgerError::MalformedEntry {
                        line: index.secret,
                        reason: format!("expected a secret record, found {}", other.kind()),
                    })
                }
            };
            for vline in &index.values {
                match Entry::parse(line_at(*vline)?, *vline)? {
                    Entry::Value { data, .. } => secret.values.push(data),
                    other => {
                        return Err(SecLedgerError::MalformedEntry {
                            line: *vline,
                            reason: format!("expected a value record, found {}", other.kind()),
                        })
                    }
                }
            }
            secrets.push((index.secret, secret));
        }
        secrets.sort_by_key(|(line, _)| *line);
        vault.secrets = secrets.into_iter().map(|(_, secret)| secret).collect();

        Ok(vault)
    }

    // ------------------------------------------------------------------
    // Atomic flush
    // ------------------------------------------------------------------

    /// Serialize the header into line 2 and atomically rewrite the file.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.header.set_version(self.version);
        self.lines[1] = self.header.marshal()?;
        self.atomic_write()
    }

    fn atomic_write(&self) -> Result<()> {
        // Pre-rewrite metadata: the rename replaces the inode, so mode
        // and owner must be captured now and reapplied after.
        let prior = fs::metadata(&self.path).ok();

        let tmp = tmp_path(&self.path);
        if let Err(e) = self.write_lines_to(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        if let Some(prior) = prior {
            // Idempotent: a crash between rename and restore is
            // corrected by the next successful flush.
            if let Err(e) = fs::set_permissions(&self.path, prior.permissions()) {
                debug!(
                    "could not restore permissions on {}: {e}",
                    self.path.display()
                );
            }
            restore_owner(&self.path, &prior);
        }
        Ok(())
    }

    fn write_lines_to(&self, tmp: &Path) -> Result<()> {
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(tmp)?;

        let mut writer = BufWriter::new(file);
        for line in &self.lines {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// `<path>.tmp`, alongside the vault so the rename stays on one
/// filesystem.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(unix)]
fn create_private_dir(parent: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(parent)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(parent: &Path) -> Result<()> {
    fs::create_dir_all(parent)?;
    Ok(())
}

#[cfg(unix)]
fn restore_owner(path: &Path, prior: &fs::Metadata) {
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::MetadataExt;

    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    let rc = unsafe { libc::chown(cpath.as_ptr(), prior.uid(), prior.gid()) };
    if rc != 0 {
        debug!(
            "could not restore owner on {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn restore_owner(_path: &Path, _prior: &fs::Metadata) {}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::memory::MemoryCrypto;
    use crate::crypto::{Algorithm, VaultCrypto};
    use crate::vault::reader::Reader;
    use std::fs;
    use tempfile::TempDir;

    const FP: &str = "dddddddddddddddddddddddddddddddddddddddd";
    const FP2: &str = "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

    fn crypto() -> MemoryCrypto {
        MemoryCrypto::with_keys([FP, FP2])
    }

    fn identity(crypto: &MemoryCrypto, fp: &str) -> Identity {
        Identity::self_signed(
            crypto,
            fp,
            &MemoryCrypto::public_key_for(fp),
            Algorithm::new("rsa", 2048),
            "Dora",
        )
        .unwrap()
    }

    fn secret_with_value(crypto: &MemoryCrypto, signer: &Identity, key: &str) -> Secret {
        let mut secret = Secret::create(crypto, signer, key).unwrap();
        let ct = crypto
            .encrypt(&[signer.fingerprint.clone()], b"plaintext")
            .unwrap();
        let value = SecretValue::create(
            crypto,
            signer,
            key,
            vec![signer.fingerprint.clone()],
            ct,
        )
        .unwrap();
        secret.values.push(value);
        secret
    }

    #[test]
    fn creates_preamble_for_new_vault() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.vault");
        let writer = Writer::load(&path).unwrap();
        assert_eq!(writer.version(), LATEST_VERSION);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER_MARKER);
        assert!(lines[1].contains("\"version\":2"));
        assert_eq!(lines[2], DATA_MARKER);
        assert!(content.ends_with('\n'));
    }

    #[cfg(unix)]
    #[test]
    fn new_vault_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("perm.vault");
        Writer::load(&path).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn append_then_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("round.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);
        let secret = secret_with_value(&crypto, &alice, "prod::DB_URL");

        {
            let mut writer = Writer::load(&path).unwrap();
            writer.add_identity(&alice).unwrap();
            writer.add_secret_with_values(&secret).unwrap();
        }

        let writer = Writer::load(&path).unwrap();
        let vault = writer.read_vault().unwrap();
        assert_eq!(vault.identities.len(), 1);
        assert_eq!(vault.identities[0].fingerprint, FP);
        assert_eq!(vault.secrets.len(), 1);
        assert_eq!(vault.secrets[0].key, "prod::DB_URL");
        assert_eq!(vault.secrets[0].values.len(), 1);

        // And the reader agrees, record for record.
        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(reader.total_lines(), 5);
        assert_eq!(reader.get_identity(FP).unwrap().signature, alice.signature);
        assert_eq!(
            reader.get_secret_values("prod::DB_URL").unwrap()[0].value,
            secret.values[0].value
        );
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);

        let mut writer = Writer::load(&path).unwrap();
        writer.add_identity(&alice).unwrap();
        let err = writer.add_identity(&alice).unwrap_err();
        assert_eq!(err.code(), "input/duplicate-identity");
        assert!(err.to_string().contains("already present"));
    }

    #[test]
    fn duplicate_secret_check_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);

        let mut writer = Writer::load(&path).unwrap();
        writer
            .add_secret(&Secret::create(&crypto, &alice, "prod::DB_URL").unwrap())
            .unwrap();
        let err = writer
            .add_secret(&Secret::create(&crypto, &alice, "PROD::db_url").unwrap())
            .unwrap_err();
        assert_eq!(err.code(), "input/duplicate-secret");
    }

    #[test]
    fn value_for_missing_secret_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orphan.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);
        let value = SecretValue::create(&crypto, &alice, "GHOST", vec![FP.into()], "YQ==".into())
            .unwrap();

        let mut writer = Writer::load(&path).unwrap();
        let err = writer.add_secret_value("GHOST", &value).unwrap_err();
        assert_eq!(err.code(), "input/secret-not-found");
    }

    #[test]
    fn values_append_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("order.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);

        let mut writer = Writer::load(&path).unwrap();
        writer
            .add_secret(&Secret::create(&crypto, &alice, "SEQ").unwrap())
            .unwrap();
        for payload in ["djE=", "djI=", "djM="] {
            let value = SecretValue::create(
                &crypto,
                &alice,
                "SEQ",
                vec![FP.into()],
                payload.to_string(),
            )
            .unwrap();
            writer.add_secret_value("SEQ", &value).unwrap();
        }

        let vault = writer.read_vault().unwrap();
        let stored: Vec<&str> = vault.secrets[0]
            .values
            .iter()
            .map(|v| v.value.as_str())
            .collect();
        assert_eq!(stored, vec!["djE=", "djI=", "djM="]);
    }

    #[test]
    fn read_only_writer_refuses_mutations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.vault");
        Writer::load(&path).unwrap(); // create

        let crypto = crypto();
        let alice = identity(&crypto, FP);
        let mut writer = Writer::load_read_only(&path).unwrap();
        let err = writer.add_identity(&alice).unwrap_err();
        assert_eq!(err.code(), "concurrency/read-only");
    }

    #[test]
    fn read_only_treats_truncated_file_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.vault");
        fs::write(&path, "one line only\n").unwrap();

        let writer = Writer::load_read_only(&path).unwrap();
        assert_eq!(writer.read_vault().unwrap().identities.len(), 0);
        // The file was not touched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "one line only\n");
    }

    #[test]
    fn read_write_recreates_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.vault");
        fs::write(&path, "one line only\n").unwrap();

        Writer::load(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(HEADER_MARKER));
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn no_temp_file_survives_a_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);

        let mut writer = Writer::load(&path).unwrap();
        writer.add_identity(&alice).unwrap();

        assert!(!tmp_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_preserves_loosened_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mode.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);

        let mut writer = Writer::load(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        writer.add_identity(&alice).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn rewrite_from_vault_swaps_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rewrite.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);
        let bob = identity(&crypto, FP2);

        let mut writer = Writer::load(&path).unwrap();
        writer.add_identity(&alice).unwrap();

        let mut vault = writer.read_vault().unwrap();
        vault.identities.push(bob.clone());
        vault
            .secrets
            .push(secret_with_value(&crypto, &alice, "NEW_KEY"));

        writer.rewrite_from_vault(&vault, None).unwrap();

        let reloaded = Writer::load(&path).unwrap().read_vault().unwrap();
        assert_eq!(reloaded.identities.len(), 2);
        assert_eq!(reloaded.secrets.len(), 1);
        assert_eq!(reloaded.secrets[0].values.len(), 1);
    }

    #[test]
    fn header_line_numbers_match_disk_positions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lines.vault");
        let crypto = crypto();
        let alice = identity(&crypto, FP);

        let mut writer = Writer::load(&path).unwrap();
        writer.add_identity(&alice).unwrap();
        writer
            .add_secret(&Secret::create(&crypto, &alice, "K1").unwrap())
            .unwrap();

        assert_eq!(writer.header().identity_line(FP), Some(4));
        let (_, index) = writer.header().secret_entry("K1").unwrap();
        assert_eq!(index.secret, 5);
    }
}
