//! Advisory file locking.
//!
//! Thin portability layer over `fs2`: `flock(2)` on Unix and
//! `LockFileEx` over the whole file region on Windows.  Locks are
//! advisory, block until granted, and die with the owning process.

use std::fs::File;
use std::path::Path;

use fs2::FileExt;

use crate::errors::{Result, SecLedgerError};

/// Lock flavour matching the open mode: exclusive for read-write
/// managers, shared for read-only ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Block until the lock is granted.
///
/// `path` is only used for the error message.
pub fn acquire(file: &File, mode: LockMode, path: &Path) -> Result<()> {
    // Fully qualified: std::fs::File has grown inherent lock methods
    // that would otherwise shadow the fs2 trait.
    let outcome = match mode {
        LockMode::Exclusive => FileExt::lock_exclusive(file),
        LockMode::Shared => FileExt::lock_shared(file),
    };
    outcome.map_err(|source| SecLedgerError::LockFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Release a previously acquired lock.
pub fn release(file: &File) -> Result<()> {
    FileExt::unlock(file)?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    #[test]
    fn exclusive_then_release_then_shared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.vault");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        acquire(&file, LockMode::Exclusive, &path).unwrap();
        release(&file).unwrap();
        acquire(&file, LockMode::Shared, &path).unwrap();
        release(&file).unwrap();
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.vault");
        let open = || {
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
                .unwrap()
        };
        let a = open();
        let b = open();

        acquire(&a, LockMode::Shared, &path).unwrap();
        acquire(&b, LockMode::Shared, &path).unwrap();
        release(&a).unwrap();
        release(&b).unwrap();
    }
}
