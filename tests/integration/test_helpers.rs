//! Shared helpers for orchestrator-level integration tests.
//!
//! Builds a host-mode `GlobalConfig` in a temp dir, a recording chat sink,
//! and fake agent scripts that print canned NDJSON.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spawn_relay::backend::Backends;
use spawn_relay::config::GlobalConfig;
use spawn_relay::models::session::{ExecutionMode, NotificationTarget, SessionConfig, Verbosity};
use spawn_relay::orchestrator::Orchestrator;
use spawn_relay::outbound::{ChatSink, SendFuture};
use tempfile::TempDir;

/// One delivered chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub channel: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// Chat sink that records every message.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<Sent> {
        self.sent.lock().expect("sink lock").clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("sink lock").len()
    }
}

impl ChatSink for RecordingSink {
    fn send<'a>(
        &'a self,
        channel: &'a str,
        text: String,
        reply_to: Option<&'a str>,
    ) -> SendFuture<'a> {
        self.sent.lock().expect("sink lock").push(Sent {
            channel: channel.to_owned(),
            text,
            reply_to: reply_to.map(str::to_owned),
        });
        Box::pin(async { Ok(()) })
    }
}

/// Temp layout: state dir, agent home, a work dir, and the agent script.
pub struct Sandbox {
    pub root: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        for dir in ["state", "agent_home", "work"] {
            std::fs::create_dir_all(root.path().join(dir)).expect("mkdir");
        }
        Self { root }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn agent_script(&self) -> PathBuf {
        self.path("fake-agent.sh")
    }

    /// Host-only configuration running the fake agent script.
    pub fn host_config(&self) -> GlobalConfig {
        let raw = format!(
            r#"
state_dir = '{state}'
authorized_user_ids = ["U_OWNER"]
allow_container_execution = false
allow_host_execution = true
default_execution_mode = 'host'

[agent]
binary = '{binary}'
home_dir = '{home}'
"#,
            state = self.path("state").display(),
            binary = self.agent_script().display(),
            home = self.path("agent_home").display(),
        );
        GlobalConfig::from_toml_str(&raw).expect("valid test config")
    }
}

/// Replace the fake agent with a shell script running `body`.
#[cfg(unix)]
pub fn write_agent(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("#!/bin/sh\n{body}\n")).expect("write agent script");
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    std::fs::rename(&tmp, path).expect("install agent script");
}

/// Orchestrator wired to a recording sink.
pub fn orchestrator(config: GlobalConfig) -> (Arc<Orchestrator>, Arc<RecordingSink>) {
    let config = Arc::new(config);
    let backends = Backends::from_config(&config).expect("backends");
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Orchestrator::new(Arc::clone(&config), backends, sink.clone())
        .with_kill_wait(Duration::from_secs(10));
    (Arc::new(orchestrator), sink)
}

pub fn host_spawn(working_dir: &Path) -> SessionConfig {
    SessionConfig {
        provider: "openai".into(),
        model: "default".into(),
        working_dir: working_dir.to_path_buf(),
        execution_mode: ExecutionMode::Host,
        verbosity: Verbosity::Answers,
        leak_env: false,
        create_dir: false,
    }
}

pub fn target() -> NotificationTarget {
    NotificationTarget {
        channel: "C_TEST".into(),
        user: "U_OWNER".into(),
        reply_to: Some("1700000000.000100".into()),
    }
}

/// Poll `check` every 20ms until it holds or five seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Wait until the spawn has no running processes.
pub async fn wait_idle(orchestrator: &Orchestrator, spawn_id: &str) {
    for _ in 0..250 {
        let idle = orchestrator
            .registry
            .lock()
            .await
            .get(spawn_id)
            .map(|entry| entry.running.is_empty())
            .unwrap_or(true);
        if idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("spawn {spawn_id} never went idle");
}

pub async fn conversation_ref(orchestrator: &Orchestrator, spawn_id: &str) -> Option<String> {
    orchestrator
        .registry
        .lock()
        .await
        .get(spawn_id)
        .expect("spawn exists")
        .record
        .conversation_ref
        .clone()
}
