use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

// Start-up stops at configuration loading, after the store has been chosen.

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let mut cmd = Command::new(cargo_bin!("panelsync"));
    cmd.env_clear().arg("--db-path").arg("some_db");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("panelsync"));
    cmd.env_clear().arg("--db-path").arg(&db_path);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("WARNING").not());
    assert!(db_path.exists());
}
