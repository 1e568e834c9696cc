//! Atomic JSON snapshot files

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Serialize `value` and replace `path` atomically using a temp file
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(value)?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| io_error(&temp_path, e))?;

    file.write_all(&json).map_err(|e| io_error(&temp_path, e))?;
    file.sync_all().map_err(|e| io_error(&temp_path, e))?;

    std::fs::rename(&temp_path, path).map_err(|e| io_error(path, e))?;
    Ok(())
}

/// Load a snapshot, returning `None` when the file does not exist yet
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path).map_err(|e| io_error(path, e))?;
    Ok(Some(serde_json::from_slice(&data)?))
}
