//! Managed per-spawn transcript files.

use std::path::{Path, PathBuf};

use crate::models::transcript::Transcript;
use crate::persistence::atomic::write_atomic;
use crate::{AppError, Result};

/// Directory of `<spawn_id>.json` transcript documents.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    /// Create a store rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Transcript path for a spawn.
    #[must_use]
    pub fn path_for(&self, spawn_id: &str) -> PathBuf {
        self.dir.join(format!("{spawn_id}.json"))
    }

    /// Read the transcript file verbatim; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` if the file exists but cannot be read.
    pub fn snapshot(&self, spawn_id: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.path_for(spawn_id))
    }

    /// Put the file back to a previous snapshot, deleting it for `None`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` if the write or removal fails.
    pub fn restore(&self, spawn_id: &str, snapshot: Option<&[u8]>) -> Result<()> {
        let path = self.path_for(spawn_id);
        match snapshot {
            Some(bytes) => write_atomic(&path, bytes)
                .map_err(|err| AppError::Transcript(format!("restore failed: {err}"))),
            None => remove_optional(&path),
        }
    }

    /// Parse a previously taken snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` if the bytes are not a transcript document.
    pub fn parse(bytes: &[u8]) -> Result<Transcript> {
        serde_json::from_slice(bytes)
            .map_err(|err| AppError::Transcript(format!("unreadable transcript: {err}")))
    }

    /// Load and parse the current transcript, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` on read or parse failure.
    pub fn load(&self, spawn_id: &str) -> Result<Option<Transcript>> {
        self.snapshot(spawn_id)?
            .map(|bytes| Self::parse(&bytes))
            .transpose()
    }

    /// Atomically replace the transcript with `transcript`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` on serialization or write failure.
    pub fn commit(&self, spawn_id: &str, transcript: &Transcript) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(transcript)
            .map_err(|err| AppError::Transcript(format!("serialize failed: {err}")))?;
        write_atomic(&self.path_for(spawn_id), &bytes)
            .map_err(|err| AppError::Transcript(format!("commit failed: {err}")))
    }

    /// Delete a spawn's transcript; missing files are fine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` if removal fails.
    pub fn remove(&self, spawn_id: &str) -> Result<()> {
        remove_optional(&self.path_for(spawn_id))
    }
}

pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Transcript(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

pub(crate) fn remove_optional(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Transcript(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}
