//! Crash-safe JSON file primitives. A write lands in a sibling temp file,
//! is verified to parse, synced, and renamed over the target; the rename is
//! the commit point, so readers only ever observe complete documents.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::{Result, StoreError};

/// Two-space indented JSON with a trailing newline: the canonical on-disk
/// encoding of every file this store owns.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text.into_bytes())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let millis = chrono::Utc::now().timestamp_millis();
    let rand = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!("{}.tmp.{}.{}", file_name, millis, &rand[..8]))
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = to_canonical_json(value)?;
    write_bytes(path, &bytes).await
}

/// Temp + verify + rename. The temp file is removed on every failure path.
pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = temp_path_for(path);
    let outcome = write_via_temp(path, &temp, bytes).await;
    if outcome.is_err() {
        let _ = fs::remove_file(&temp).await;
    }
    outcome
}

async fn write_via_temp(path: &Path, temp: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(temp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    // Verify the bytes that actually hit disk parse back before committing.
    let written = fs::read(temp).await?;
    serde_json::from_slice::<serde::de::IgnoredAny>(&written).map_err(|e| {
        StoreError::internal(format!(
            "refusing to commit unparseable write to {}: {}",
            path.display(),
            e
        ))
    })?;

    fs::rename(temp, path).await?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).await.map_err(|e| {
        StoreError::internal(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        StoreError::internal(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// `Ok(None)` when the file does not exist; parse failures still error.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            StoreError::internal(format!("failed to parse {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::internal(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Exclusive create (`wx` semantics). Returns `false` when the file already
/// exists, so two racing creators resolve without error.
pub async fn create_exclusive(path: &Path, bytes: &[u8]) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let open = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    match open {
        Ok(mut file) => {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StoreError::internal(format!(
            "failed to create {}: {}",
            path.display(),
            e
        ))),
    }
}
