//! Execution backends: where and how the agent process runs.
//!
//! Both strategies implement [`ExecutionBackend`], so the supervisor starts
//! and finalizes runs without knowing whether a container is involved.

pub mod command;
pub mod container;
pub mod env;
pub mod host;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::process::Child;

use crate::backend::container::ContainerBackend;
use crate::backend::host::HostBackend;
use crate::config::GlobalConfig;
use crate::models::session::{ExecutionMode, SessionRecord};
use crate::{AppError, Result};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Uniform lifecycle contract for a spawn's execution resource.
pub trait ExecutionBackend: Send + Sync {
    /// Create the long-lived resource for a new spawn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if creation fails.
    fn provision<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()>;

    /// Make the resource ready for one run.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if the resource
    /// does not become ready.
    fn prepare_run<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()>;

    /// Start the agent process with stdin open and stdout/stderr piped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on spawn failure.
    fn launch<'a>(
        &'a self,
        session: &'a SessionRecord,
        invocation: &'a AgentInvocation,
    ) -> BackendFuture<'a, Child>;

    /// Release per-run resources. Never fails because the resource is
    /// already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) only if the
    /// runtime cannot be invoked at all.
    fn finalize_run<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()>;

    /// Destroy the spawn's resource.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if removal fails.
    fn teardown<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()>;
}

/// The backends a deployment uses, selected per spawn.
#[derive(Clone)]
pub struct Backends {
    /// Host process backend.
    pub host: Arc<dyn ExecutionBackend>,
    /// Container backend; absent when no image is configured.
    pub container: Option<Arc<dyn ExecutionBackend>>,
}

impl Backends {
    /// Build the host and (when an image is configured) container backends.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the container backend cannot be built.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let host = HostBackend::new(config.agent_env_file.clone());
        let container = match config.container.image {
            Some(_) => Some(Arc::new(ContainerBackend::new(
                config.container.clone(),
                config.agent.home_dir.clone(),
                config.agent_env_file.clone(),
            )?) as Arc<dyn ExecutionBackend>),
            None => None,
        };
        Ok(Self {
            host: Arc::new(host),
            container,
        })
    }

    /// Backend responsible for `mode`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` when container mode has no backend.
    pub fn for_mode(&self, mode: ExecutionMode) -> Result<Arc<dyn ExecutionBackend>> {
        match mode {
            ExecutionMode::Host => Ok(Arc::clone(&self.host)),
            ExecutionMode::Container => self.container.clone().ok_or_else(|| {
                AppError::InvalidConfig("container execution is not configured".into())
            }),
        }
    }
}

/// Command line for one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Agent binary.
    pub binary: String,
    /// Arguments after the binary.
    pub args: Vec<String>,
}

impl AgentInvocation {
    /// Build the arguments for `prompt`, resuming `conversation_ref` when set.
    #[must_use]
    pub fn build(binary: &str, session: &SessionRecord, prompt: &str) -> Self {
        let mut args: Vec<String> = vec!["exec".into()];
        if session.conversation_ref.is_some() {
            args.push("resume".into());
        }
        args.extend(
            ["--json", "--skip-git-repo-check", "--full-auto"]
                .iter()
                .map(|flag| (*flag).to_owned()),
        );

        if session.provider == "oss" {
            args.push("--oss".into());
        } else {
            args.push("-c".into());
            args.push(format!("model_provider=\"{}\"", session.provider));
        }
        if session.model != "default" {
            args.push("-m".into());
            args.push(session.model.clone());
        }

        match session.conversation_ref {
            Some(ref conversation) => args.push(conversation.clone()),
            None => {
                args.push("-C".into());
                args.push(session.working_dir.to_string_lossy().into_owned());
            }
        }
        args.push(prompt.to_owned());

        Self {
            binary: binary.to_owned(),
            args,
        }
    }
}

/// Full agent prompt: global instructions, the request, and any uploads.
#[must_use]
pub fn build_prompt(instructions: &str, request: &str, attachments: &[PathBuf]) -> String {
    let mut prompt = format!("{instructions}\n\nUser request:\n{request}");
    if !attachments.is_empty() {
        prompt.push_str("\n\nUploaded attachments:");
        for path in attachments {
            prompt.push_str("\n- ");
            prompt.push_str(&path.to_string_lossy());
        }
    }
    prompt
}
