//! Integration tests for the JSON file cache.

use db_provider::cache::{load, save_and_replace, save_or_update};
use db_provider::error::DbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Entry {
    name: String,
    hits: u32,
}

fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
        .collect()
}

#[tokio::test]
async fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entries.json");
    let cancel = CancellationToken::new();

    let entries = vec![
        Entry {
            name: "a".into(),
            hits: 1,
        },
        Entry {
            name: "b".into(),
            hits: 7,
        },
    ];
    save_and_replace(&path, &entries, &cancel).await.unwrap();

    let loaded: Vec<Entry> = load(&path, &cancel).await.unwrap();
    assert_eq!(loaded, entries);
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_load_defaults() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let missing: Vec<Entry> = load(&dir.path().join("missing.json"), &cancel)
        .await
        .unwrap();
    assert!(missing.is_empty());

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, b"{ not json").unwrap();
    let loaded: Vec<Entry> = load(&corrupt, &cancel).await.unwrap();
    assert!(loaded.is_empty());

    let wrong_shape = dir.path().join("shape.json");
    std::fs::write(&wrong_shape, br#"{"name": "x"}"#).unwrap();
    let loaded: Vec<Entry> = load(&wrong_shape, &cancel).await.unwrap();
    assert!(loaded.is_empty());

    // Corrupt files are left for the next successful write to replace
    assert!(corrupt.exists());
}

#[tokio::test]
async fn test_save_rejects_blank_path_and_null_value() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let err = save_and_replace(Path::new(""), &vec![1, 2], &cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(err, DbError::InvalidInput { ref message } if message == "No file path provided")
    );

    let nothing: Option<Vec<Entry>> = None;
    let path = dir.path().join("none.json");
    let err = save_and_replace(&path, &nothing, &cancel).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { ref message } if message == "No Data provided"));
    assert!(!path.exists());

    let err = save_or_update(Path::new("  "), |v: Vec<Entry>| v, &cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(err, DbError::InvalidInput { ref message } if message == "No file path provided")
    );
}

#[tokio::test]
async fn test_save_or_update_creates_then_updates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counts.json");
    let cancel = CancellationToken::new();

    let bump = |mut counts: BTreeMap<String, u32>| {
        *counts.entry("runs".to_string()).or_default() += 1;
        counts
    };

    let first = save_or_update(&path, bump, &cancel).await.unwrap();
    assert_eq!(first.get("runs"), Some(&1));

    let second = save_or_update(&path, bump, &cancel).await.unwrap();
    assert_eq!(second.get("runs"), Some(&2));

    let stored: BTreeMap<String, u32> = load(&path, &cancel).await.unwrap();
    assert_eq!(stored, second);
}

#[tokio::test]
async fn test_save_or_update_replaces_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entries.json");
    std::fs::write(&path, b"garbage").unwrap();
    let cancel = CancellationToken::new();

    let written = save_or_update(
        &path,
        |mut entries: Vec<Entry>| {
            entries.push(Entry {
                name: "fresh".into(),
                hits: 0,
            });
            entries
        },
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(written.len(), 1);

    let loaded: Vec<Entry> = load(&path, &cancel).await.unwrap();
    assert_eq!(loaded, written);
}

#[tokio::test]
async fn test_failed_replace_keeps_destination_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    // A non-empty directory at the destination cannot be replaced by a file
    let path = dir.path().join("occupied.json");
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();
    let cancel = CancellationToken::new();

    let err = save_and_replace(&path, &vec![1, 2, 3], &cancel)
        .await
        .unwrap_err();
    // The move failure is reported as is; no deletion is attempted
    assert!(matches!(
        err,
        DbError::CacheWrite { ref message, .. } if message.contains("move temp file into place")
    ));
    assert!(path.join("keep").exists());
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancelled_save_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cancelled.json");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = save_and_replace(&path, &vec![1], &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_concurrent_saves_to_distinct_paths() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let path = dir.path().join(format!("entry_{}.json", i));
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let entry = Entry {
                name: format!("entry {}", i),
                hits: i,
            };
            save_and_replace(&path, &entry, &cancel).await.map(|_| path)
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let path = handle.await.unwrap().unwrap();
        let loaded: Entry = load(&path, &cancel).await.unwrap();
        assert_eq!(loaded.hits, i as u32);
    }
    assert!(leftover_temp_files(dir.path()).is_empty());
}
