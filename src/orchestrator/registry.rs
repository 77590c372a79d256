//! In-memory spawn registry with write-through persistence.
//!
//! Every mutating call saves the full registry before returning. Only the
//! durable [`SessionRecord`] half of each entry reaches disk; run handles and
//! notification targets stay in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::GlobalConfig;
use crate::models::session::{validate_spawn_id, SessionConfig, SessionEntry, SessionRecord};
use crate::persistence::registry_store::RegistryStore;
use crate::{AppError, Result};

/// Character forbidden in working directories (container mount separator).
pub const FORBIDDEN_PATH_CHAR: char = ':';

/// Spawn registry keyed by spawn id.
#[derive(Debug)]
pub struct Registry {
    entries: BTreeMap<String, SessionEntry>,
    store: RegistryStore,
}

impl Registry {
    /// Load the registry from `store`, dropping invalid entries.
    #[must_use]
    pub fn load(store: RegistryStore) -> Self {
        let entries = store
            .load()
            .into_iter()
            .map(|(id, record)| (id, SessionEntry::new(record)))
            .collect();
        Self { entries, store }
    }

    /// Whether `spawn_id` is registered.
    #[must_use]
    pub fn contains(&self, spawn_id: &str) -> bool {
        self.entries.contains_key(spawn_id)
    }

    /// Number of registered spawns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no spawn is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered spawn ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// All entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.entries.values()
    }

    /// Look up an entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids.
    pub fn get(&self, spawn_id: &str) -> Result<&SessionEntry> {
        self.entries
            .get(spawn_id)
            .ok_or_else(|| AppError::NotFound(format!("unknown spawn id '{spawn_id}'")))
    }

    /// Look up an entry for in-memory mutation. Call [`Registry::save`] when
    /// the durable record changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids.
    pub fn get_mut(&mut self, spawn_id: &str) -> Result<&mut SessionEntry> {
        self.entries
            .get_mut(spawn_id)
            .ok_or_else(|| AppError::NotFound(format!("unknown spawn id '{spawn_id}'")))
    }

    /// Register a new spawn and persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateId` if the id is taken, or the save error.
    pub fn insert(&mut self, record: SessionRecord) -> Result<()> {
        if self.contains(&record.spawn_id) {
            return Err(AppError::DuplicateId(format!(
                "spawn id '{}' is already in use",
                record.spawn_id
            )));
        }
        info!(spawn_id = %record.spawn_id, "spawn registered");
        self.entries
            .insert(record.spawn_id.clone(), SessionEntry::new(record));
        self.save()
    }

    /// Mutate a durable record and persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids, or the save error.
    pub fn update(&mut self, spawn_id: &str, mutate: impl FnOnce(&mut SessionRecord)) -> Result<()> {
        let entry = self.get_mut(spawn_id)?;
        mutate(&mut entry.record);
        self.save()
    }

    /// Remove a spawn and persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids, or the save error.
    pub fn remove(&mut self, spawn_id: &str) -> Result<SessionEntry> {
        let entry = self
            .entries
            .remove(spawn_id)
            .ok_or_else(|| AppError::NotFound(format!("unknown spawn id '{spawn_id}'")))?;
        self.save()?;
        info!(spawn_id, "spawn removed");
        Ok(entry)
    }

    /// Drop every entry and delete the registry file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be removed.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.store.remove_file()
    }

    /// Persist every durable record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn save(&self) -> Result<()> {
        self.store.save(self.entries.values().map(|entry| &entry.record))
    }

    /// Registry file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

/// Outcome of validating a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Normalized record to register.
    pub record: SessionRecord,
    /// The working directory is missing and will be created.
    pub create_dir: bool,
}

/// Validate a create request against the id rules and the global policy.
///
/// Nothing is mutated; a missing working directory is only reported through
/// [`NewSession::create_dir`].
///
/// # Errors
///
/// Returns `AppError::InvalidId` or `AppError::InvalidConfig` for the first
/// violated rule.
pub fn validate_new(spawn_id: &str, config: &SessionConfig, policy: &GlobalConfig) -> Result<NewSession> {
    validate_spawn_id(spawn_id)?;

    let provider = config.provider.trim().to_owned();
    if !policy.allows_provider(&provider) {
        return Err(AppError::InvalidConfig(format!(
            "provider '{provider}' is not allowed"
        )));
    }

    let working_dir = absolute(&expand_home(&config.working_dir));
    if working_dir.to_string_lossy().contains(FORBIDDEN_PATH_CHAR) {
        return Err(AppError::InvalidConfig(format!(
            "working dir '{}' must not contain '{FORBIDDEN_PATH_CHAR}'",
            working_dir.display()
        )));
    }

    let create_dir = !working_dir.is_dir();
    if create_dir && !config.create_dir {
        return Err(AppError::InvalidConfig(format!(
            "working dir '{}' does not exist",
            working_dir.display()
        )));
    }

    if config.leak_env && !policy.allow_leak_env {
        return Err(AppError::InvalidConfig(
            "leak_env has been configured as disallowed".into(),
        ));
    }

    if !policy.allows_mode(config.execution_mode) {
        return Err(AppError::InvalidConfig(format!(
            "{} execution has been disabled by configuration",
            config.execution_mode
        )));
    }

    Ok(NewSession {
        record: SessionRecord {
            spawn_id: spawn_id.to_owned(),
            conversation_ref: None,
            provider,
            model: config.model.trim().to_owned(),
            working_dir,
            execution_mode: config.execution_mode,
            verbosity: config.verbosity,
            leak_env: config.leak_env,
        },
        create_dir,
    })
}

/// Expand a leading `~` to the current user's home directory.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}
