//! The agent binary's own session logs.
//!
//! The agent persists every conversation as `rollout-*<conversation_ref>*.jsonl`
//! somewhere below `<agent_home>/sessions/`. A reverting kill has to put that
//! file back too, otherwise the next resume would replay the killed turn.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::persistence::atomic::write_atomic;
use crate::persistence::transcript_store::{read_optional, remove_optional};
use crate::Result;

/// Lookup of agent session logs below `<agent_home>/sessions`.
#[derive(Debug, Clone)]
pub struct AgentLogStore {
    sessions_dir: PathBuf,
}

impl AgentLogStore {
    /// Create a store for the given agent home directory.
    #[must_use]
    pub fn new(agent_home: &Path) -> Self {
        Self {
            sessions_dir: agent_home.join("sessions"),
        }
    }

    /// Most recently modified log for `conversation_ref`, if any.
    #[must_use]
    pub fn find(&self, conversation_ref: &str) -> Option<PathBuf> {
        let pattern = format!(
            "{}/**/*{}*.jsonl",
            glob::Pattern::escape(&self.sessions_dir.to_string_lossy()),
            glob::Pattern::escape(conversation_ref)
        );
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(%err, pattern, "invalid agent log pattern");
                return None;
            }
        };

        paths
            .filter_map(std::result::Result::ok)
            .map(|path| {
                let modified = std::fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
    }

    /// Contents of the current log for `conversation_ref`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` if the file exists but cannot be read.
    pub fn snapshot(&self, conversation_ref: Option<&str>) -> Result<Option<Vec<u8>>> {
        match conversation_ref.and_then(|id| self.find(id)) {
            Some(path) => read_optional(&path),
            None => Ok(None),
        }
    }

    /// Restore the log for `conversation_ref` to `previous`.
    ///
    /// With no previous content the log is deleted. Returns whether a file
    /// was touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite or removal fails.
    pub fn restore(&self, conversation_ref: Option<&str>, previous: Option<&[u8]>) -> Result<bool> {
        let Some(path) = conversation_ref.and_then(|id| self.find(id)) else {
            debug!(?conversation_ref, "no agent log to restore");
            return Ok(false);
        };
        match previous {
            Some(bytes) => write_atomic(&path, bytes)?,
            None => remove_optional(&path)?,
        }
        Ok(true)
    }
}
