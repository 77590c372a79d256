//! Flat-file store for the spawn registry.
//!
//! The registry is a single JSON object keyed by spawn id. Loading validates
//! every entry on its own: an entry that fails the schema or normalization
//! check is dropped with a logged reason so a partially corrupted file never
//! prevents startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::models::session::{validate_spawn_id, ExecutionMode, SessionRecord, Verbosity};
use crate::persistence::atomic::write_atomic;
use crate::{AppError, Result};

/// Keys every persisted entry must carry.
const REQUIRED_KEYS: &[&str] = &[
    "spawn_id",
    "conversation_ref",
    "provider",
    "model",
    "working_dir",
    "execution_mode",
    "verbosity",
    "leak_env",
];

/// Older registry files stored the conversation reference under this key.
const LEGACY_CONVERSATION_KEY: &str = "codex_session_id";

/// Registry file location plus the provider allow-list used on load.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    allowed_providers: Vec<String>,
}

impl RegistryStore {
    /// Create a store backed by `path`.
    #[must_use]
    pub fn new(path: PathBuf, allowed_providers: Vec<String>) -> Self {
        Self {
            path,
            allowed_providers,
        }
    }

    /// Registry file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all valid entries. A missing or unreadable file yields an empty map.
    #[must_use]
    pub fn load(&self) -> BTreeMap<String, SessionRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no registry file, starting empty");
                return BTreeMap::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "registry unreadable, starting empty");
                return BTreeMap::new();
            }
        };

        let root = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(root)) => root,
            Ok(_) => {
                warn!(path = %self.path.display(), "registry root is not an object, starting empty");
                return BTreeMap::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "registry is not valid json, starting empty");
                return BTreeMap::new();
            }
        };

        let mut records = BTreeMap::new();
        for (spawn_id, entry) in root {
            match normalize_entry(&spawn_id, entry, &self.allowed_providers) {
                Ok(record) => {
                    records.insert(spawn_id, record);
                }
                Err(reason) => {
                    warn!(%spawn_id, %reason, "dropping incompatible spawn from registry");
                }
            }
        }

        info!(count = records.len(), "registry loaded");
        records
    }

    /// Persist the full registry, replacing the file atomically.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if serialization or the write fails.
    pub fn save<'a>(&self, records: impl IntoIterator<Item = &'a SessionRecord>) -> Result<()> {
        let map: BTreeMap<&str, &SessionRecord> = records
            .into_iter()
            .map(|record| (record.spawn_id.as_str(), record))
            .collect();
        let bytes = serde_json::to_vec_pretty(&map)?;
        write_atomic(&self.path, &bytes)
    }

    /// Delete the registry file; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be removed.
    pub fn remove_file(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(format!(
                "failed to remove {}: {err}",
                self.path.display()
            ))),
        }
    }
}

/// Validate one persisted entry against the schema and normalize it.
///
/// # Errors
///
/// Returns a human-readable reason when the entry is unusable.
pub fn normalize_entry(
    spawn_id: &str,
    entry: Value,
    allowed_providers: &[String],
) -> std::result::Result<SessionRecord, String> {
    let Value::Object(mut entry) = entry else {
        return Err("spawn entry is not an object".into());
    };

    if !entry.contains_key("conversation_ref") {
        if let Some(legacy) = entry.remove(LEGACY_CONVERSATION_KEY) {
            entry.insert("conversation_ref".into(), legacy);
        }
    }

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !entry.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing keys: {}", missing.join(", ")));
    }

    if str_field(&entry, "spawn_id")? != spawn_id {
        return Err("spawn_id key mismatch".into());
    }
    validate_spawn_id(spawn_id).map_err(|err| err.to_string())?;

    let provider = str_field(&entry, "provider")?.trim().to_owned();
    if !allowed_providers.iter().any(|p| *p == provider) {
        return Err(format!("provider '{provider}' not allowed"));
    }

    let model = str_field(&entry, "model")?.trim().to_owned();
    let working_dir = PathBuf::from(str_field(&entry, "working_dir")?);

    let execution_mode: ExecutionMode = match str_field(&entry, "execution_mode")? {
        "container" | "docker" => ExecutionMode::Container,
        "host" => ExecutionMode::Host,
        _ => return Err("execution_mode must be 'container' or 'host'".into()),
    };

    let verbosity: Verbosity = str_field(&entry, "verbosity")?
        .parse()
        .map_err(|_| "verbosity must be 'answers' or 'verbose'".to_owned())?;

    let conversation_ref = match entry.get("conversation_ref") {
        Some(Value::Null) | None => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err("conversation_ref must be null or string".into()),
    };

    let leak_env = match entry.get("leak_env") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::Null) => false,
        _ => return Err("leak_env must be a boolean".into()),
    };

    Ok(SessionRecord {
        spawn_id: spawn_id.to_owned(),
        conversation_ref,
        provider,
        model,
        working_dir,
        execution_mode,
        verbosity,
        leak_env,
    })
}

fn str_field<'a>(
    entry: &'a Map<String, Value>,
    key: &str,
) -> std::result::Result<&'a str, String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{key} must be a string"))
}
