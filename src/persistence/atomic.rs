//! Atomic file replacement.
//!
//! Writes go to a temporary file in the destination directory and are then
//! renamed over the target via `tempfile::NamedTempFile::persist()`, so a
//! crash never leaves a partially written registry or transcript behind.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Replace `path` with `bytes`, creating parent directories as needed.
///
/// # Errors
///
/// Returns `AppError::Io` on directory creation, temp file write, or rename
/// failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(bytes)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist file to {}: {err}", path.display()))
    })?;

    Ok(())
}
