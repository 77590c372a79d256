//! Session orchestration: registry, process supervision, and reconciliation.
//!
//! [`Orchestrator`] is the shared application state. It is built once at
//! startup, wrapped in an `Arc`, and handed to the chat adapter and to every
//! run's reader task.

pub mod reconciler;
pub mod registry;
pub mod session_manager;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::backend::Backends;
use crate::config::GlobalConfig;
use crate::orchestrator::registry::Registry;
use crate::outbound::segmenter::SegmentPolicy;
use crate::outbound::{ChatSink, Outbound};
use crate::persistence::agent_log::AgentLogStore;
use crate::persistence::registry_store::RegistryStore;
use crate::persistence::transcript_store::TranscriptStore;

/// How long `kill` waits for each run to settle.
pub const KILL_WAIT: Duration = Duration::from_secs(30);

/// Shared application state.
pub struct Orchestrator {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Spawn registry. Never held across process waits.
    pub registry: Mutex<Registry>,
    /// Execution backends.
    pub backends: Backends,
    /// Managed transcripts.
    pub transcripts: TranscriptStore,
    /// The agent's own session logs.
    pub agent_logs: AgentLogStore,
    /// Segmented chat delivery.
    pub outbound: Outbound,
    instructions: RwLock<String>,
    kill_wait: Duration,
}

impl Orchestrator {
    /// Load the registry and assemble shared state.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, backends: Backends, sink: Arc<dyn ChatSink>) -> Self {
        let store = RegistryStore::new(config.registry_path(), config.allowed_providers.clone());
        Self {
            registry: Mutex::new(Registry::load(store)),
            backends,
            transcripts: TranscriptStore::new(config.transcripts_dir()),
            agent_logs: AgentLogStore::new(&config.agent.home_dir),
            outbound: Outbound::new(sink, SegmentPolicy::from(&config.outbound)),
            instructions: RwLock::new(config.instructions.clone()),
            kill_wait: KILL_WAIT,
            config,
        }
    }

    /// Override the per-run kill wait.
    #[must_use]
    pub fn with_kill_wait(mut self, kill_wait: Duration) -> Self {
        self.kill_wait = kill_wait;
        self
    }

    /// Instructions prepended to every prompt.
    pub async fn instructions(&self) -> String {
        self.instructions.read().await.clone()
    }

    /// Replace the instructions for all future runs.
    pub async fn set_instructions(&self, instructions: String) {
        *self.instructions.write().await = instructions;
    }
}
