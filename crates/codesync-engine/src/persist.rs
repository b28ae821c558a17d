//! Local JSON state files under `<project>/.codesync`

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{Result, SyncError};

pub const STATE_DIR: &str = ".codesync";

pub fn state_path(project_root: &Path, file_name: &str) -> PathBuf {
    project_root.join(STATE_DIR).join(file_name)
}

/// Read a JSON state file, `None` when it does not exist yet
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SyncError::file_processing_error_with_source(
                path.display().to_string(),
                e,
            ));
        }
    };
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::file_processing_error_with_source(path.display().to_string(), e))?;
    Ok(Some(value))
}

/// Write a JSON state file via write-then-rename so readers never observe a
/// partial file
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| SyncError::internal_error(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::file_processing_error_with_source(parent.display().to_string(), e))?;

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| SyncError::file_processing_error_with_source(tmp.display().to_string(), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| SyncError::file_processing_error_with_source(path.display().to_string(), e))?;
    Ok(())
}
