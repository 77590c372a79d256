//! Spawn lifecycle: create, reconfigure, kill, and delete.

use tracing::{info, info_span, warn, Instrument};

use crate::models::session::SessionConfig;
use crate::orchestrator::registry::{validate_new, NewSession};
use crate::orchestrator::Orchestrator;
use crate::{AppError, Result};

/// Token `delete_all` requires.
pub const DELETE_ALL_CONFIRMATION: &str = "CONFIRM";

/// What a kill did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillReport {
    /// Runs terminated.
    pub killed: usize,
    /// Whether the spawn was deleted afterwards.
    pub deleted: bool,
}

impl Orchestrator {
    /// Validate, provision, and register a new spawn.
    ///
    /// The working directory is created when missing and allowed. Container
    /// spawns get their container here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateId`, `AppError::InvalidId`, or
    /// `AppError::InvalidConfig` without side effects, and
    /// `AppError::Backend` when provisioning fails.
    pub async fn create_session(&self, spawn_id: &str, config: &SessionConfig) -> Result<NewSession> {
        let span = info_span!("create_session", spawn_id);
        async {
            if self.registry.lock().await.contains(spawn_id) {
                return Err(AppError::DuplicateId(format!(
                    "spawn id '{spawn_id}' is already in use"
                )));
            }
            let new = validate_new(spawn_id, config, &self.config)?;

            if new.create_dir {
                std::fs::create_dir_all(&new.record.working_dir).map_err(|err| {
                    AppError::Io(format!(
                        "failed to create {}: {err}",
                        new.record.working_dir.display()
                    ))
                })?;
                info!(working_dir = %new.record.working_dir.display(), "working dir created");
            }

            let backend = self.backends.for_mode(new.record.execution_mode)?;
            backend.provision(&new.record).await?;

            let inserted = self.registry.lock().await.insert(new.record.clone());
            if let Err(err) = inserted {
                if let Err(teardown_err) = backend.teardown(&new.record).await {
                    warn!(%teardown_err, "failed to tear down after rejected insert");
                }
                return Err(err);
            }
            Ok(new)
        }
        .instrument(span)
        .await
    }

    /// Change a spawn's provider. Returns the normalized provider.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or `AppError::InvalidConfig`.
    pub async fn set_provider(&self, spawn_id: &str, provider: &str) -> Result<String> {
        let mut registry = self.registry.lock().await;
        registry.get(spawn_id)?;
        let provider = provider.trim().to_owned();
        if !self.config.allows_provider(&provider) {
            return Err(AppError::InvalidConfig(format!("invalid provider '{provider}'")));
        }
        let stored = provider.clone();
        registry.update(spawn_id, |record| record.provider = stored)?;
        info!(spawn_id, %provider, "provider changed");
        Ok(provider)
    }

    /// Change a spawn's model.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown spawns.
    pub async fn set_model(&self, spawn_id: &str, model: &str) -> Result<()> {
        let model = model.trim().to_owned();
        self.registry
            .lock()
            .await
            .update(spawn_id, |record| record.model.clone_from(&model))?;
        info!(spawn_id, %model, "model changed");
        Ok(())
    }

    /// Kill a spawn's runs and optionally delete it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown spawns or a persistence error.
    pub async fn kill_session(&self, spawn_id: &str, delete: bool, revert: bool) -> Result<KillReport> {
        let killed = self.kill_runs(spawn_id, revert).await?;
        if delete {
            self.delete_session(spawn_id).await?;
        } else {
            self.registry.lock().await.save()?;
        }
        Ok(KillReport {
            killed,
            deleted: delete,
        })
    }

    /// Tear down a spawn's backend resource and artifacts, then unregister it.
    ///
    /// Teardown failures are logged; the spawn is removed regardless.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown spawns or a persistence error.
    pub async fn delete_session(&self, spawn_id: &str) -> Result<()> {
        let record = self.registry.lock().await.get(spawn_id)?.record.clone();
        let span = info_span!("delete_session", spawn_id);
        async {
            match self.backends.for_mode(record.execution_mode) {
                Ok(backend) => {
                    if let Err(err) = backend.teardown(&record).await {
                        warn!(%err, "backend teardown failed, deleting anyway");
                    }
                }
                Err(err) => warn!(%err, "no backend for teardown"),
            }
            if let Err(err) = self.transcripts.remove(spawn_id) {
                warn!(%err, "failed to remove transcript");
            }
            self.registry.lock().await.remove(spawn_id)?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Kill and delete every spawn, then remove the registry file.
    /// Returns how many spawns were deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` without the confirmation token, or
    /// the registry file removal error.
    pub async fn delete_all(&self, confirmation: &str) -> Result<usize> {
        if confirmation != DELETE_ALL_CONFIRMATION {
            return Err(AppError::InvalidConfig(format!(
                "confirm this action by typing {DELETE_ALL_CONFIRMATION}"
            )));
        }
        let ids = self.registry.lock().await.ids();
        let mut deleted = 0;
        for spawn_id in &ids {
            match self.kill_session(spawn_id, true, true).await {
                Ok(_) => deleted += 1,
                Err(err) => warn!(%spawn_id, %err, "failed to delete spawn"),
            }
        }
        self.registry.lock().await.clear()?;
        info!(deleted, "all spawns deleted");
        Ok(deleted)
    }
}
