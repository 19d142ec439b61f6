//! Generic JSON file cache.
//!
//! Reads are tolerant: a missing, unreadable or incompatible file yields the
//! type's default value. Writes are strict: they go through a temp file in the
//! destination directory followed by a rename, so readers never observe a
//! partially written file, and every failure is returned to the caller.
//!
//! No locking is performed. Concurrent [`save_and_replace`] calls on one path
//! are last-writer-wins; [`save_or_update`] is a plain read-modify-write and can
//! lose an update when two callers race on the same path.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

const NO_PATH: &str = "No file path provided";
const NO_DATA: &str = "No Data provided";

/// Load the value stored at `path`, or `T::default()` when there is none.
///
/// Only cancellation is reported as an error.
pub async fn load<T>(path: &Path, cancel: &CancellationToken) -> DbResult<T>
where
    T: DeserializeOwned + Default,
{
    Ok(read_cached(path, cancel).await?.unwrap_or_default())
}

/// Atomically replace the file at `path` with the JSON encoding of `value`.
pub async fn save_and_replace<T>(path: &Path, value: &T, cancel: &CancellationToken) -> DbResult<()>
where
    T: Serialize + ?Sized,
{
    if is_blank(path) {
        return Err(DbError::invalid_input(NO_PATH));
    }
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| DbError::invalid_input(format!("Value cannot be serialized: {}", e)))?;
    if bytes == b"null" {
        return Err(DbError::invalid_input(NO_DATA));
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::cancelled("cache write")),
        r = write_atomic(path, &bytes) => r,
    };

    match &result {
        Ok(()) => debug!(path = %path.display(), bytes = bytes.len(), "Cache file written"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(path = %path.display(), error = %e, "Cache write failed"),
    }
    result
}

/// Load the cached value, transform it with `update`, and persist the result.
///
/// Returns the value that was written.
pub async fn save_or_update<T, F>(path: &Path, update: F, cancel: &CancellationToken) -> DbResult<T>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(T) -> T,
{
    if is_blank(path) {
        return Err(DbError::invalid_input(NO_PATH));
    }

    let existing = match read_cached::<T>(path, cancel).await? {
        Some(value) => value,
        None => {
            warn!(path = %path.display(), "No usable cached value, starting from default");
            T::default()
        }
    };

    let updated = update(existing);
    save_and_replace(path, &updated, cancel).await?;
    Ok(updated)
}

/// `None` when the file is missing, unreadable or not a `T`.
async fn read_cached<T>(path: &Path, cancel: &CancellationToken) -> DbResult<Option<T>>
where
    T: DeserializeOwned,
{
    if is_blank(path) {
        debug!("Cache load with empty path");
        return Ok(None);
    }

    let read = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DbError::cancelled("cache read")),
        r = fs::read(path) => r,
    };

    let bytes = match read {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Cache miss");
            return Ok(None);
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache file unreadable, ignoring");
            return Ok(None);
        }
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => {
            debug!(path = %path.display(), "Cache hit");
            Ok(Some(value))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache file has an incompatible format, ignoring");
            Ok(None)
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> DbResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| write_error(path, "resolve file name", "path has no file name"))?;

    fs::create_dir_all(&parent)
        .await
        .map_err(|e| write_error(path, "create cache directory", e))?;

    let temp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));
    let guard = TempFileGuard::new(temp_path.clone());

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| write_error(path, "create temp file", e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| write_error(path, "write temp file", e))?;
    file.sync_all()
        .await
        .map_err(|e| write_error(path, "flush temp file", e))?;
    drop(file);

    replace(&temp_path, path).await?;
    guard.disarm();
    Ok(())
}

/// Move `temp` over `dest`. rename(2) replaces an existing file in place.
/// Platforms that refuse to replace a file (permission or already-exists
/// errors) get the destination deleted and the move retried; any other
/// failure leaves the destination untouched.
async fn replace(temp: &Path, dest: &Path) -> DbResult<()> {
    let first = match fs::rename(temp, dest).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let dest_is_file = fs::metadata(dest).await.is_ok_and(|m| m.is_file());
    if !should_delete_and_retry(&first, dest_is_file) {
        return Err(write_error(dest, "move temp file into place", first));
    }

    debug!(path = %dest.display(), error = %first, "Replace refused, deleting destination and retrying");
    fs::remove_file(dest)
        .await
        .map_err(|e| write_error(dest, "remove existing cache file", e))?;
    fs::rename(temp, dest)
        .await
        .map_err(|e| write_error(dest, "move temp file into place", e))
}

fn should_delete_and_retry(error: &std::io::Error, dest_is_file: bool) -> bool {
    dest_is_file
        && matches!(
            error.kind(),
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::AlreadyExists
        )
}

fn write_error(path: &Path, action: &str, error: impl std::fmt::Display) -> DbError {
    DbError::cache_write(
        path.display().to_string(),
        format!("Failed to {}: {}", action, error),
    )
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}

/// Removes the temp file on drop unless disarmed. Runs on error returns and
/// when a cancelled write future is dropped.
struct TempFileGuard {
    path: Option<PathBuf>,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Could not remove temp file");
                }
            }
        }
    }
}
