//! Inbound attachment download into the spawn's working directory.
//!
//! Files land in `<working_dir>/.codexmaster_uploads/<spawn_id>/` under a
//! sanitized name; clashes get a `_N` suffix before the extension. A file
//! that cannot be fetched is logged and skipped.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{AppError, Result};

/// Upload directory name inside the working directory.
pub const UPLOADS_DIR: &str = ".codexmaster_uploads";

/// A file attached to an inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Platform file id, used when the name sanitizes to nothing.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// Download URL.
    pub url: String,
}

/// Directory uploads for `spawn_id` are saved to.
#[must_use]
pub fn uploads_dir(working_dir: &Path, spawn_id: &str) -> PathBuf {
    working_dir.join(UPLOADS_DIR).join(spawn_id)
}

/// Reduce `name` to a safe single path component.
///
/// Separators and whitespace become `_`, anything outside
/// `[A-Za-z0-9_.-]` is dropped, and leading dots or underscores are
/// stripped. May return an empty string.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter_map(|c| match c {
            '/' | '\\' => Some('_'),
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') => Some(c),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_owned()
}

/// First path in `dir` for `name` that does not exist yet.
#[must_use]
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };
    let mut counter = 1_u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Downloads attachments over HTTP.
#[derive(Debug, Clone)]
pub struct AttachmentFetcher {
    client: reqwest::Client,
    bearer: Option<String>,
}

impl AttachmentFetcher {
    /// Create a fetcher. `bearer` is sent as an `Authorization` header,
    /// which private chat-platform file URLs require.
    #[must_use]
    pub fn new(bearer: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bearer,
        }
    }

    /// Save every attachment into `dir`. Returns the paths written, in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if `dir` cannot be created.
    pub async fn save_all(&self, dir: &Path, attachments: &[Attachment]) -> Result<Vec<PathBuf>> {
        if attachments.is_empty() {
            return Ok(Vec::new());
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| AppError::Io(format!("failed to create {}: {err}", dir.display())))?;

        let mut saved = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let mut name = sanitize_file_name(&attachment.name);
            if name.is_empty() {
                name = format!("attachment_{}", sanitize_file_name(&attachment.id));
            }
            let path = unique_path(dir, &name);
            match self.download(&attachment.url, &path).await {
                Ok(size) => {
                    info!(path = %path.display(), size, "attachment saved");
                    saved.push(path);
                }
                Err(err) => warn!(name = %attachment.name, %err, "attachment skipped"),
            }
        }
        Ok(saved)
    }

    async fn download(&self, url: &str, path: &Path) -> Result<usize> {
        let mut request = self.client.get(url);
        if let Some(ref token) = self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| AppError::Io(format!("download failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Io(format!("download failed: HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Io(format!("download interrupted: {err}")))?;
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))?;
        Ok(bytes.len())
    }
}
