//! `delete_all` against a recording container backend.

#![cfg(unix)]

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spawn_relay::backend::host::HostBackend;
use spawn_relay::backend::{AgentInvocation, BackendFuture, Backends, ExecutionBackend};
use spawn_relay::config::GlobalConfig;
use spawn_relay::models::session::{ExecutionMode, SessionRecord};
use spawn_relay::orchestrator::Orchestrator;
use spawn_relay::AppError;
use tokio::process::{Child, Command};

use super::test_helpers::{host_spawn, target, RecordingSink, Sandbox};

/// Container backend double: records calls, runs `sleep` as the agent.
#[derive(Default)]
struct FakeContainer {
    calls: Mutex<Vec<String>>,
}

impl FakeContainer {
    fn record(&self, op: &str, session: &SessionRecord) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{op}:{}", session.spawn_id));
    }

    fn calls(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|call| call.starts_with(op))
            .cloned()
            .collect()
    }
}

impl ExecutionBackend for FakeContainer {
    fn provision<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        self.record("provision", session);
        Box::pin(async { Ok(()) })
    }

    fn prepare_run<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        self.record("prepare", session);
        Box::pin(async { Ok(()) })
    }

    fn launch<'a>(
        &'a self,
        session: &'a SessionRecord,
        _invocation: &'a AgentInvocation,
    ) -> BackendFuture<'a, Child> {
        self.record("launch", session);
        Box::pin(async {
            Command::new("sleep")
                .arg("30")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| AppError::Backend(err.to_string()))
        })
    }

    fn finalize_run<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        self.record("finalize", session);
        Box::pin(async { Ok(()) })
    }

    fn teardown<'a>(&'a self, session: &'a SessionRecord) -> BackendFuture<'a, ()> {
        self.record("teardown", session);
        Box::pin(async { Ok(()) })
    }
}

fn container_config(sandbox: &Sandbox) -> GlobalConfig {
    let raw = format!(
        r#"
state_dir = '{state}'
allow_container_execution = true
allow_host_execution = true

[agent]
home_dir = '{home}'

[container]
image = "agent:latest"
"#,
        state = sandbox.path("state").display(),
        home = sandbox.path("agent_home").display(),
    );
    GlobalConfig::from_toml_str(&raw).expect("valid test config")
}

fn setup(sandbox: &Sandbox) -> (Arc<Orchestrator>, Arc<FakeContainer>) {
    let fake = Arc::new(FakeContainer::default());
    let backends = Backends {
        host: Arc::new(HostBackend::new(None)),
        container: Some(fake.clone() as Arc<dyn ExecutionBackend>),
    };
    let orchestrator = Orchestrator::new(
        Arc::new(container_config(sandbox)),
        backends,
        Arc::new(RecordingSink::default()),
    )
    .with_kill_wait(Duration::from_secs(10));
    (Arc::new(orchestrator), fake)
}

async fn create_two(orch: &Orchestrator, sandbox: &Sandbox) {
    for id in ["alpha", "beta"] {
        let mut config = host_spawn(&sandbox.path("work"));
        config.execution_mode = ExecutionMode::Container;
        orch.create_session(id, &config).await.expect("create");
    }
}

#[tokio::test]
async fn wrong_confirmation_deletes_nothing() {
    let sandbox = Sandbox::new();
    let (orch, fake) = setup(&sandbox);
    create_two(&orch, &sandbox).await;

    let result = orch.delete_all("confirm").await;
    assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    assert_eq!(orch.registry.lock().await.len(), 2);
    assert!(orch.config.registry_path().exists());
    assert!(fake.calls("teardown").is_empty());
}

#[tokio::test]
async fn confirmed_delete_all_kills_tears_down_and_removes_registry() {
    let sandbox = Sandbox::new();
    let (orch, fake) = setup(&sandbox);
    create_two(&orch, &sandbox).await;
    assert_eq!(fake.calls("provision").len(), 2);

    let handle = orch
        .start_run("alpha", "busy", &[], target())
        .await
        .expect("start");
    assert_eq!(orch.list().await.iter().map(|s| s.runs.len()).sum::<usize>(), 1);

    let deleted = orch.delete_all("CONFIRM").await.expect("delete all");
    assert_eq!(deleted, 2);
    assert!(handle.has_exited());
    assert_eq!(fake.calls("teardown"), vec!["teardown:alpha", "teardown:beta"]);
    assert!(!fake.calls("finalize").is_empty());
    assert!(orch.registry.lock().await.is_empty());
    assert!(!orch.config.registry_path().exists());
}
