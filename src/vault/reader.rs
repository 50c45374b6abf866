//! Direct-access vault file reader.
//!
//! The reader scans the file once at construction to build a byte
//! offset for every line, then serves any header-referenced record with
//! a single seek and a one-line parse.  It never writes and holds no
//! lock of its own; managers use it under their shared lock, and ad-hoc
//! callers can point it at a vault file directly.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::entry::{Entry, Identity, Secret, SecretValue};
use super::header::{Header, DATA_MARKER, HEADER_MARKER, PREAMBLE_LINES};
use crate::errors::{Result, SecLedgerError};
use crate::key::SecretKey;

/// Read-only view of one vault file.
#[derive(Debug)]
pub struct Reader {
    path: PathBuf,
    /// `None` when the file is absent or empty (an empty vault).
    file: Option<BufReader<File>>,
    /// Byte offset of each line, 0-indexed by line.
    offsets: Vec<u64>,
    header: Header,
}

impl Reader {
    /// Open `path` read-only and index its lines.
    ///
    /// An absent or zero-length file yields an empty vault at the
    /// latest format version — not an error.  A present file with a bad
    /// marker or malformed header is a hard error.
    pub fn open(path: &Path) -> Result<Self> {
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if len == 0 {
            return Ok(Self {
                path: path.to_path_buf(),
                file: None,
                offsets: Vec::new(),
                header: Header::default(),
            });
        }

        let mut file = BufReader::new(File::open(path)?);
        let mut offsets = Vec::new();
        let mut lines = Vec::new();
        let mut pos = 0u64;

        loop {
            let mut buf = String::new();
            let read = file.read_line(&mut buf)?;
            if read == 0 {
                break;
            }
            offsets.push(pos);
            pos += read as u64;
            // Preamble lines are all we keep in memory.
            if lines.len() < PREAMBLE_LINES {
                lines.push(buf.trim_end_matches('\n').to_string());
            }
        }

        if lines.len() < PREAMBLE_LINES {
            return Err(SecLedgerError::MalformedHeader(format!(
                "{} has fewer than {PREAMBLE_LINES} lines",
                path.display()
            )));
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

        let reader = Self {
            path: path.to_path_buf(),
            file: Some(file),
            offsets,
            header,
        };
        reader.check_references()?;
        Ok(reader)
    }

    /// Every header-referenced line must exist in the file.
    fn check_references(&self) -> Result<()> {
        let total = self.offsets.len();
        let check = |line: usize| -> Result<()> {
            if line == 0 || line > total {
                Err(SecLedgerError::InvalidLineReference { line, total })
            } else {
                Ok(())
            }
        };
        for (_, line) in self.header.identities() {
            check(*line)?;
        }
        for index in self.header.secrets().values() {
            check(index.secret)?;
            for line in &index.values {
                check(*line)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Header-only accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn version(&self) -> u32 {
        self.header.version()
    }

    /// Fingerprints in line order.
    pub fn list_identities(&self) -> Vec<String> {
        self.header
            .identities()
            .iter()
            .map(|(fp, _)| fp.clone())
            .collect()
    }

    /// Stored canonical keys.
    pub fn list_secrets(&self) -> Vec<String> {
        self.header.secrets().keys().cloned().collect()
    }

    pub fn has_identity(&self, fingerprint: &str) -> bool {
        self.header.has_identity(fingerprint)
    }

    pub fn has_secret(&self, key: &str) -> bool {
        self.header.has_secret(key)
    }

    /// Total line count, preamble included.
    pub fn total_lines(&self) -> usize {
        self.offsets.len()
    }

    /// Number of records the header points at.
    pub fn entry_count(&self) -> usize {
        self.header.entry_count()
    }

    // ------------------------------------------------------------------
    // Record reads (seek + one-line parse)
    // ------------------------------------------------------------------

    /// Fetch one identity record by fingerprint.
    pub fn get_identity(&mut self, fingerprint: &str) -> Result<Identity> {
        let line = self
            .header
            .identity_line(fingerprint)
            .ok_or_else(|| SecLedgerError::IdentityNotFound(fingerprint.to_string()))?;
        match self.entry_at(line)? {
            Entry::Identity { data } => Ok(data),
            other => Err(unexpected_record(line, "identity", other.kind())),
        }
    }

    /// Fetch one secret definition by key (values not loaded).
    pub fn get_secret(&mut self, key: &str) -> Result<Secret> {
        let line = self
            .header
            .secret_entry(key)
            .map(|(_, index)| index.secret)
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))?;
        match self.entry_at(line)? {
            Entry::Secret { data } => Ok(data),
            other => Err(unexpected_record(line, "secret", other.kind())),
        }
    }

    /// Fetch a secret's value records in append order.
    pub fn get_secret_values(&mut self, key: &str) -> Result<Vec<SecretValue>> {
        let lines = self
            .header
            .secret_entry(key)
            .map(|(_, index)| index.values.clone())
            .ok_or_else(|| SecLedgerError::SecretNotFound(SecretKey::canonicalize_lossy(key)))?;

        let mut values = Vec::with_capacity(lines.len());
        for line in lines {
            match self.entry_at(line)? {
                Entry::Value { data, .. } => values.push(data),
                other => return Err(unexpected_record(line, "value", other.kind())),
            }
        }
        Ok(values)
    }

    /// Seek to a 1-indexed line and parse it as an entry.
    fn entry_at(&mut self, line_no: usize) -> Result<Entry> {
        let line = self.read_line_at(line_no)?;
        Entry::parse(&line, line_no)
    }

    fn read_line_at(&mut self, line_no: usize) -> Result<String> {
        let total = self.offsets.len();
        if line_no == 0 || line_no > total {
            return Err(SecLedgerError::InvalidLineReference {
                line: line_no,
                total,
            });
        }
        let file = self
            .file
            .as_mut()
            .ok_or(SecLedgerError::InvalidLineReference {
                line: line_no,
                total,
            })?;

        file.seek(SeekFrom::Start(self.offsets[line_no - 1]))?;
        let mut buf = String::new();
        file.read_line(&mut buf)?;
        Ok(buf.trim_end_matches('\n').to_string())
    }

    /// Iterate all data records, skipping the preamble and any
    /// `#`-prefixed comment line.
    pub fn stream_entries(&mut self) -> Result<EntryStream<'_>> {
        let reader = match self.file.as_mut() {
            Some(file) => {
                if self.offsets.len() > PREAMBLE_LINES {
                    file.seek(SeekFrom::Start(self.offsets[PREAMBLE_LINES]))?;
                    Some(file)
                } else {
                    None
                }
            }
            None => None,
        };
        Ok(EntryStream {
            reader,
            line_no: PREAMBLE_LINES + 1,
        })
    }
}

/// Iterator over `(line_no, entry)` pairs in file order.
pub struct EntryStream<'a> {
    reader: Option<&'a mut BufReader<File>>,
    line_no: usize,
}

impl Iterator for EntryStream<'_> {
    type Item = Result<(usize, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        loop {
            let mut buf = String::new();
            match reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            let line_no = self.line_no;
            self.line_no += 1;

            let line = buf.trim_end_matches('\n');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Some(Entry::parse(line, line_no).map(|entry| (line_no, entry)));
        }
    }
}

fn unexpected_record(line: usize, expected: &str, got: &str) -> SecLedgerError {
    SecLedgerError::MalformedEntry {
        line,
        reason: format!("expected a {expected} record, found {got}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
