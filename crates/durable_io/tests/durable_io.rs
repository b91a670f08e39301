// Filesystem behavior of the durable primitives, on real tempdirs.

use durable_io::{atomic_write, delete, ensure_dir, exists, list_regular, read_all};
use seal_core::Error;
use std::fs;

#[test]
fn atomic_write_creates_and_replaces() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("record.enc");

    atomic_write(&target, b"first").unwrap();
    assert_eq!(read_all(&target).unwrap(), b"first");

    atomic_write(&target, b"second").unwrap();
    assert_eq!(read_all(&target).unwrap(), b"second");
}

#[test]
fn atomic_write_leaves_no_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("record.enc");
    atomic_write(&target, b"payload").unwrap();

    let names = list_regular(dir.path()).unwrap();
    assert_eq!(names, vec!["record.enc".to_string()]);
}

#[test]
fn atomic_write_creates_missing_parents() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a").join("b").join("record.enc");
    atomic_write(&target, b"deep").unwrap();
    assert_eq!(read_all(&target).unwrap(), b"deep");
}

#[test]
fn read_all_missing_is_path_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let res = read_all(&dir.path().join("absent"));
    assert!(matches!(res, Err(Error::PathNotFound(_))));
}

#[test]
fn read_all_empty_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("empty");
    atomic_write(&target, b"").unwrap();
    assert_eq!(read_all(&target).unwrap(), Vec::<u8>::new());
}

#[test]
fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("gone");
    atomic_write(&target, b"x").unwrap();

    delete(&target).unwrap();
    assert!(!exists(&target));
    delete(&target).unwrap();
}

#[test]
fn list_regular_skips_directories() {
    let dir = tempfile::tempdir().unwrap();
    atomic_write(&dir.path().join("file-a"), b"a").unwrap();
    atomic_write(&dir.path().join("file-b"), b"b").unwrap();
    fs::create_dir(dir.path().join("subdir")).unwrap();

    let mut names = list_regular(dir.path()).unwrap();
    names.sort();
    assert_eq!(names, vec!["file-a".to_string(), "file-b".to_string()]);
}

#[test]
fn ensure_dir_is_recursive_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("x").join("y").join("z");
    ensure_dir(&nested).unwrap();
    assert!(nested.is_dir());
    ensure_dir(&nested).unwrap();
}

#[test]
fn ensure_dir_over_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("occupied");
    atomic_write(&file, b"not a dir").unwrap();

    assert!(matches!(ensure_dir(&file), Err(Error::OperationFailed(_))));
    assert!(matches!(
        ensure_dir(&file.join("child")),
        Err(Error::OperationFailed(_))
    ));
}
