//! Container backend: one persistent container per spawn.
//!
//! The container is created when the spawn is created, started (and waited
//! on until its entrypoint reports readiness) before every run, and stopped
//! after every run. The agent itself is started with `exec -i` so stdin stays
//! open.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::command::{run, run_until_sentinel};
use super::env::{env_flags, generated_container_env};
use super::{AgentInvocation, BackendFuture, ExecutionBackend};
use crate::config::ContainerConfig;
use crate::models::session::SessionRecord;
use crate::{AppError, Result};

/// Container runtime driver (`docker`-compatible CLI).
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    config: ContainerConfig,
    image: String,
    agent_home: PathBuf,
    env_file: Option<PathBuf>,
}

impl ContainerBackend {
    /// Create a container backend.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no image is configured.
    pub fn new(
        config: ContainerConfig,
        agent_home: PathBuf,
        env_file: Option<PathBuf>,
    ) -> Result<Self> {
        let image = config
            .image
            .clone()
            .ok_or_else(|| AppError::Config("container.image is not configured".into()))?;
        Ok(Self {
            config,
            image,
            agent_home,
            env_file,
        })
    }

    /// Deterministic container name for `spawn_id`.
    #[must_use]
    pub fn container_name(&self, spawn_id: &str) -> String {
        let prefix: String = self
            .image
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{prefix}-agent-container-{spawn_id}")
    }

    /// Arguments for `<runtime> create`.
    #[must_use]
    pub fn create_args(&self, session: &SessionRecord) -> Vec<String> {
        let generated = generated_container_env();
        let home_in_container = generated
            .iter()
            .find(|(key, _)| key == "CODEX_HOME")
            .map_or_else(|| "/root".to_owned(), |(_, value)| value.clone());
        let working_dir = session.working_dir.to_string_lossy().into_owned();

        let mut args = vec![
            "create".to_owned(),
            "--name".to_owned(),
            self.container_name(&session.spawn_id),
            "--cap-add=NET_ADMIN".to_owned(),
            "--cpus".to_owned(),
            self.config.cpus.to_string(),
            "--memory".to_owned(),
            format!("{}g", self.config.memory_gb),
            "-v".to_owned(),
            format!("{working_dir}:{working_dir}"),
            "-v".to_owned(),
            format!(
                "{}:{home_in_container}/.codex",
                self.agent_home.to_string_lossy()
            ),
            "-w".to_owned(),
            working_dir,
        ];

        args.extend(env_flags(&generated));
        if session.leak_env {
            let leaked: Vec<(String, String)> = std::env::vars()
                .filter(|(key, _)| !generated.iter().any(|(generated, _)| generated == key))
                .collect();
            args.extend(env_flags(&leaked));
        }
        if let Some(ref env_file) = self.env_file {
            args.push("--env-file".to_owned());
            args.push(env_file.to_string_lossy().into_owned());
        }
        args.push(self.image.clone());
        args
    }

    async fn stop(&self, spawn_id: &str) -> Result<()> {
        let args = vec![
            "stop".to_owned(),
            "-t".to_owned(),
            self.config.stop_grace_seconds.to_string(),
            self.container_name(spawn_id),
        ];
        run(&self.config.runtime, &args, true).await?;
        Ok(())
    }
}

impl ExecutionBackend for ContainerBackend {
    fn provision<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if session.leak_env {
                warn!(spawn_id = %session.spawn_id, "creating container with leaked environment");
            }
            info!(
                spawn_id = %session.spawn_id,
                working_dir = %session.working_dir.display(),
                "creating agent container"
            );
            run(&self.config.runtime, &self.create_args(session), false)
                .await?
                .ensure_success()?;
            Ok(())
        })
    }

    fn prepare_run<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = vec![
                "start".to_owned(),
                "-a".to_owned(),
                self.container_name(&session.spawn_id),
            ];
            run_until_sentinel(&self.config.runtime, &args, &self.config.ready_sentinel).await
        })
    }

    fn launch<'a>(
        &'a self,
        session: &'a SessionRecord,
        invocation: &'a AgentInvocation,
    ) -> BackendFuture<'a, Child> {
        Box::pin(async move {
            let name = self.container_name(&session.spawn_id);
            let child = Command::new(&self.config.runtime)
                .arg("exec")
                .arg("-i")
                .arg(&name)
                .arg(&invocation.binary)
                .args(&invocation.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| {
                    AppError::Backend(format!("failed to exec agent in container {name}: {err}"))
                })?;

            info!(
                spawn_id = %session.spawn_id,
                container = %name,
                pid = child.id().unwrap_or(0),
                "container agent process spawned"
            );
            Ok(child)
        })
    }

    fn finalize_run<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(self.stop(&session.spawn_id))
    }

    fn teardown<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.stop(&session.spawn_id).await?;
            let args = vec!["rm".to_owned(), self.container_name(&session.spawn_id)];
            run(&self.config.runtime, &args, false)
                .await?
                .ensure_success()?;
            info!(spawn_id = %session.spawn_id, "agent container removed");
            Ok(())
        })
    }
}
