//! JSON persistence for artifacts, trial records and exported models.
//!
//! Writes go to a `.tmp` sibling and are renamed into place, so a crashed run
//! never leaves a half-written artifact behind under the final name.

use crate::error::MlError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Atomically write pretty-printed JSON, creating parent directories.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), MlError> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), MlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON that must exist.
///
/// A missing file is `MlError::NotFound`; malformed content is `MlError::Serde`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, MlError> {
    if !path.exists() {
        return Err(MlError::not_found(path.display().to_string()));
    }
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Load JSON if the file exists.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, MlError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Hex SHA-256 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
