//! Host backend: the agent runs as a plain child process.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::env::minimal_host_env;
use super::{AgentInvocation, BackendFuture, ExecutionBackend};
use crate::models::session::SessionRecord;
use crate::AppError;

/// Launches the agent directly in the spawn's working directory.
#[derive(Debug, Clone, Default)]
pub struct HostBackend {
    env_file: Option<PathBuf>,
}

impl HostBackend {
    /// Create a host backend merging `env_file` into non-leaking environments.
    #[must_use]
    pub fn new(env_file: Option<PathBuf>) -> Self {
        Self { env_file }
    }
}

impl ExecutionBackend for HostBackend {
    fn provision<'a>(&'a self, _session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn prepare_run<'a>(&'a self, _session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn launch<'a>(
        &'a self,
        session: &'a SessionRecord,
        invocation: &'a AgentInvocation,
    ) -> BackendFuture<'a, Child> {
        Box::pin(async move {
            let mut cmd = Command::new(&invocation.binary);
            cmd.args(&invocation.args).current_dir(&session.working_dir);

            if session.leak_env {
                warn!(spawn_id = %session.spawn_id, "launching host agent with leaked environment");
            } else {
                cmd.env_clear();
                for (key, value) in minimal_host_env(self.env_file.as_deref())? {
                    cmd.env(key, value);
                }
            }

            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let child = cmd.spawn().map_err(|err| {
                AppError::Backend(format!(
                    "failed to spawn agent `{}` in {}: {err}",
                    invocation.binary,
                    session.working_dir.display()
                ))
            })?;

            info!(
                spawn_id = %session.spawn_id,
                pid = child.id().unwrap_or(0),
                "host agent process spawned"
            );
            Ok(child)
        })
    }

    fn finalize_run<'a>(&'a self, _session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn teardown<'a>(&'a self, _session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}
