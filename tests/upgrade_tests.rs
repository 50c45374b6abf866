//! Integration tests for the v1 → v2 format upgrade path.

mod common;

use std::fs;

use secledger::vault::{Manager, ManagerOptions, Writer, HEADER_MARKER};
use tempfile::TempDir;

use common::{identity, team_crypto, ALICE, BOB};

/// A v1 fixture with two identities, one secret, one value.
fn v1_vault(dir: &TempDir) -> (secledger::crypto::memory::MemoryCrypto, std::path::PathBuf) {
    let crypto = team_crypto();
    let path = dir.path().join("legacy.vault");
    {
        let mut manager = Manager::open(&path).unwrap();
        manager.add_identity(identity(&crypto, ALICE, "Alice")).unwrap();
        manager.add_identity(identity(&crypto, BOB, "Bob")).unwrap();
        manager
            .put_secret(&crypto, ALICE, "LEGACY", b"payload", &[ALICE.into(), BOB.into()])
            .unwrap();
    }
    {
        let mut writer = Writer::load(&path).unwrap();
        let vault = writer.read_vault().unwrap();
        writer.rewrite_from_vault(&vault, Some(1)).unwrap();
    }
    (crypto, path)
}

#[test]
fn v1_fixture_really_is_v1() {
    let dir = TempDir::new().unwrap();
    let (_, path) = v1_vault(&dir);

    let content = fs::read_to_string(&path).unwrap();
    let header: serde_json::Value =
        serde_json::from_str(content.lines().nth(1).unwrap()).unwrap();
    assert_eq!(header["version"], 1);
    assert!(
        header["identities"].is_array(),
        "v1 stores identities as [fingerprint, line] pairs"
    );
}

#[test]
fn auto_upgrade_rewrites_v1_as_v2_with_identical_entities() {
    let dir = TempDir::new().unwrap();
    let (crypto, path) = v1_vault(&dir);

    let manager = Manager::open(&path).unwrap();
    assert_eq!(manager.version(), 2);
    drop(manager);

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], HEADER_MARKER);

    let header: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(header["version"], 2);
    assert!(
        header["identities"].is_object(),
        "v2 stores identities as an object"
    );
    assert_eq!(header["identities"][ALICE], 4);
    assert_eq!(header["identities"][BOB], 5);

    // Entities survived the rewrite byte-for-byte where it matters.
    let manager = Manager::open(&path).unwrap();
    assert_eq!(manager.vault().identities.len(), 2);
    assert_eq!(manager.vault().secrets.len(), 1);
    let (plaintext, fallback) = manager
        .decrypt_secret(&crypto, "LEGACY", BOB, false)
        .unwrap();
    assert_eq!(&plaintext[..], b"payload");
    assert!(!fallback);
    manager.verify(&crypto).unwrap();
}

#[test]
fn explicit_upgrade_mode_keeps_v1_until_asked() {
    let dir = TempDir::new().unwrap();
    let (crypto, path) = v1_vault(&dir);

    let options = ManagerOptions {
        require_explicit_vault_upgrade: true,
        ..ManagerOptions::default()
    };
    let mut manager = Manager::open_with_options(&path, options.clone()).unwrap();
    assert_eq!(manager.version(), 1);

    // v1 vaults remain fully usable in the meantime.
    let (plaintext, _) = manager
        .decrypt_secret(&crypto, "LEGACY", ALICE, false)
        .unwrap();
    assert_eq!(&plaintext[..], b"payload");
    manager
        .put_secret(&crypto, ALICE, "NEW_IN_V1", b"x", &[ALICE.into()])
        .unwrap();
    drop(manager);

    // Still v1 on disk after real work happened.
    let content = fs::read_to_string(&path).unwrap();
    let header: serde_json::Value =
        serde_json::from_str(content.lines().nth(1).unwrap()).unwrap();
    assert_eq!(header["version"], 1);

    // The explicit upgrade converts and keeps everything.
    let mut manager = Manager::open_with_options(&path, options).unwrap();
    manager.upgrade().unwrap();
    assert_eq!(manager.version(), 2);
    assert!(manager.has_secret("NEW_IN_V1"));
    assert!(manager.has_secret("LEGACY"));
}
