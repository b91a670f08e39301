// Tamper, wrong-key and crash-window behavior of the retrieval path.

use record_store::{RecordStore, StoreConfig};
use seal_core::{Error, FixedIdentity};
use std::fs;
use std::path::Path;

const IDENTITY: &[u8] = b"DeviceSN001";

fn open_store(root: &Path) -> RecordStore {
    RecordStore::open(StoreConfig::with_root(root), &FixedIdentity::new(IDENTITY)).unwrap()
}

fn flip_bytes(path: &Path, range: std::ops::Range<usize>) {
    let mut raw = fs::read(path).unwrap();
    for b in &mut raw[range] {
        *b = 0xff;
    }
    fs::write(path, raw).unwrap();
}

#[test]
fn tampered_main_recovers_from_backup_and_heals() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", &[0x01, 0x02, 0x03]).unwrap();
    store.store("cfg", &[0x04, 0x05]).unwrap();

    // Corrupt the ciphertext region of MAIN; BACKUP still holds v1.
    let main = dir.path().join("cfg.enc");
    let backup = dir.path().join("cfg.enc.bak");
    flip_bytes(&main, 12..15);

    assert_eq!(store.retrieve("cfg").unwrap(), vec![0x01, 0x02, 0x03]);

    // MAIN is healed with the backup's raw ciphertext: same nonce, same tag.
    assert_eq!(fs::read(&main).unwrap(), fs::read(&backup).unwrap());
    assert_eq!(store.retrieve("cfg").unwrap(), vec![0x01, 0x02, 0x03]);
}

#[test]
fn wrong_identity_fails_authentication() {
    let dir = tempfile::tempdir().unwrap();

    open_store(dir.path()).store("cfg", b"device-bound").unwrap();

    let other = RecordStore::open(
        StoreConfig::with_root(dir.path()),
        &FixedIdentity::new(&b"DeviceSN002"[..]),
    )
    .unwrap();
    assert!(matches!(other.retrieve("cfg"), Err(Error::AuthenticationFailed)));
}

#[test]
fn tampered_main_without_backup_surfaces_the_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"only version").unwrap();
    flip_bytes(&dir.path().join("cfg.enc"), 12..13);

    assert!(matches!(store.retrieve("cfg"), Err(Error::AuthenticationFailed)));

    // The corrupt MAIN was discarded; with no recovery source the record
    // is now gone rather than poisoned.
    assert!(!store.exists("cfg").unwrap());
    assert!(matches!(store.retrieve("cfg"), Err(Error::DataNotFound(_))));
}

#[test]
fn tampered_main_and_backup_never_return_success() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"v1").unwrap();
    store.store("cfg", b"v2").unwrap();
    flip_bytes(&dir.path().join("cfg.enc"), 12..13);
    flip_bytes(&dir.path().join("cfg.enc.bak"), 12..13);

    assert!(matches!(
        store.retrieve("cfg"),
        Err(Error::AuthenticationFailed | Error::DecryptionFailed)
    ));
}

#[test]
fn truncated_main_takes_the_recovery_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"v1").unwrap();
    store.store("cfg", b"v2").unwrap();

    // Below the 28-byte frame minimum: rejected before tag verification.
    fs::write(dir.path().join("cfg.enc"), b"short").unwrap();

    assert_eq!(store.retrieve("cfg").unwrap(), b"v1");
}

#[test]
fn backup_only_record_exists_but_is_not_listed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"v1").unwrap();
    store.store("cfg", b"v2").unwrap();
    fs::remove_file(dir.path().join("cfg.enc")).unwrap();

    // The asymmetry is deliberate: exists() consults BACKUP, list() does not.
    assert!(store.exists("cfg").unwrap());
    assert!(store.list().unwrap().is_empty());

    // Retrieval recovers the backup version and re-creates MAIN...
    assert_eq!(store.retrieve("cfg").unwrap(), b"v1");
    // ...after which the record is enumerable again.
    let ids: Vec<String> = store.list().unwrap().into_iter().map(|id| id.into_string()).collect();
    assert_eq!(ids, ["cfg"]);
}

#[test]
fn stale_temp_files_are_invisible_and_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    // Crash window: a store died after staging but before any rename.
    fs::write(dir.path().join("cfg.enc.tmp"), b"interrupted").unwrap();
    fs::write(dir.path().join("cfg.enc.tmp._atomicwrite_tmp"), b"interrupted").unwrap();

    assert!(store.list().unwrap().is_empty());
    assert!(!store.exists("cfg").unwrap());
    assert!(matches!(store.retrieve("cfg"), Err(Error::DataNotFound(_))));

    // The next store of the same id reclaims the staging names.
    store.store("cfg", b"fresh").unwrap();
    assert_eq!(store.retrieve("cfg").unwrap(), b"fresh");
    assert!(!dir.path().join("cfg.enc.tmp").exists());
}

#[test]
fn crash_between_rotate_and_install_leaves_backup_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"v1").unwrap();

    // Simulate dying after MAIN was rotated to BACKUP but before the staged
    // file was installed: BACKUP holds v1, MAIN is absent, TEMP is stale.
    fs::rename(dir.path().join("cfg.enc"), dir.path().join("cfg.enc.bak")).unwrap();
    fs::write(dir.path().join("cfg.enc.tmp"), b"partial").unwrap();

    assert!(store.exists("cfg").unwrap());
    assert_eq!(store.retrieve("cfg").unwrap(), b"v1");

    // Healing restored MAIN; a subsequent store rotates normally.
    store.store("cfg", b"v2").unwrap();
    assert_eq!(store.retrieve("cfg").unwrap(), b"v2");
}

#[test]
fn crash_after_install_leaves_new_version_current() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"v1").unwrap();
    store.store("cfg", b"v2").unwrap();

    // Dying right after the install rename leaves a fully rotated pair plus
    // possibly a stale staging file from an unrelated interrupted write.
    fs::write(dir.path().join("cfg.enc.tmp._atomicwrite_tmp"), b"junk").unwrap();

    assert_eq!(store.retrieve("cfg").unwrap(), b"v2");
    let ids: Vec<String> = store.list().unwrap().into_iter().map(|id| id.into_string()).collect();
    assert_eq!(ids, ["cfg"]);
}

#[test]
fn retrieve_prefers_main_over_stale_backup() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    store.store("cfg", b"old").unwrap();
    store.store("cfg", b"new").unwrap();

    assert_eq!(store.retrieve("cfg").unwrap(), b"new");
}
