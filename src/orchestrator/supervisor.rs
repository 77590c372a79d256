//! Process supervision: start runs, kill them, and report what is running.
//!
//! Each run is owned by a reader task that drains the agent's output, relays
//! notifications, and on end of stream finalizes the backend, reaps the
//! process, and reconciles the transcript. Removing the run from its spawn
//! and reading the revert flag happen under the registry lock, which is also
//! where `kill` marks runs, so a run is either killed or completed, never
//! both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::process::Child;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::command::describe_status;
use crate::backend::{build_prompt, AgentInvocation, ExecutionBackend};
use crate::models::run::RunHandle;
use crate::models::session::{ExecutionMode, NotificationTarget, SessionRecord, Verbosity};
use crate::orchestrator::reconciler::{self, RunSnapshot};
use crate::orchestrator::Orchestrator;
use crate::relay::format::Notification;
use crate::relay::reader::{merged_lines, LineStream, Relay};
use crate::{AppError, Result};

/// Status of one spawn for `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnStatus {
    /// Spawn id.
    pub spawn_id: String,
    /// Bound backend.
    pub execution_mode: ExecutionMode,
    /// Relay verbosity.
    pub verbosity: Verbosity,
    /// `(pid, elapsed)` for every running process.
    pub runs: Vec<(Option<u32>, Duration)>,
}

struct RunTask {
    record: SessionRecord,
    handle: RunHandle,
    child: Child,
    lines: LineStream,
    snapshot: RunSnapshot,
    target: NotificationTarget,
    backend: Arc<dyn ExecutionBackend>,
}

impl Orchestrator {
    /// Launch the agent for `request` on `spawn_id` and start relaying.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown spawns,
    /// `AppError::InvalidConfig` when the policy no longer allows the spawn's
    /// provider or mode, and backend errors when the process cannot start.
    pub async fn start_run(
        self: &Arc<Self>,
        spawn_id: &str,
        request: &str,
        attachments: &[PathBuf],
        target: NotificationTarget,
    ) -> Result<RunHandle> {
        let instructions = self.instructions().await;
        let (record, snapshot) = {
            let mut registry = self.registry.lock().await;
            let entry = registry.get_mut(spawn_id)?;
            let record = entry.record.clone();
            self.check_runnable(&record)?;
            entry.target = Some(target.clone());
            let snapshot = RunSnapshot::capture(&self.transcripts, &self.agent_logs, &record)?;
            (record, snapshot)
        };

        let span = info_span!("start_run", spawn_id, mode = %record.execution_mode);
        async {
            let backend = self.backends.for_mode(record.execution_mode)?;
            backend.prepare_run(&record).await?;

            let prompt = build_prompt(&instructions, request, attachments);
            let invocation = AgentInvocation::build(&self.config.agent.binary, &record, &prompt);
            let mut child = match backend.launch(&record, &invocation).await {
                Ok(child) => child,
                Err(err) => {
                    if let Err(stop_err) = backend.finalize_run(&record).await {
                        warn!(%stop_err, "failed to finalize after launch failure");
                    }
                    return Err(err);
                }
            };
            let lines = merged_lines(&mut child)?;

            let handle = RunHandle::new(child.id());
            {
                let mut registry = self.registry.lock().await;
                match registry.get_mut(spawn_id) {
                    Ok(entry) => entry.running.push(handle.clone()),
                    Err(err) => {
                        drop(registry);
                        if let Err(kill_err) = child.kill().await {
                            warn!(%kill_err, "failed to kill orphaned agent process");
                        }
                        return Err(err);
                    }
                }
            }
            info!(run_id = %handle.run_id, pid = ?handle.pid, "agent run started");

            let task = RunTask {
                record: record.clone(),
                handle: handle.clone(),
                child,
                lines,
                snapshot,
                target,
                backend,
            };
            let run_span = info_span!("run", spawn_id, run_id = %handle.run_id);
            tokio::spawn(Arc::clone(self).drive_run(task).instrument(run_span));
            Ok(handle)
        }
        .instrument(span)
        .await
    }

    /// Terminate every run of `spawn_id`; with `revert`, their transcripts
    /// are rolled back. Returns the number of runs killed.
    ///
    /// Runs that already finished are not counted. A run that does not
    /// settle within the kill wait is logged and still counted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown spawns.
    pub async fn kill_runs(&self, spawn_id: &str, revert: bool) -> Result<usize> {
        let span = info_span!("kill_runs", spawn_id, revert);
        async {
            let (record, runs) = {
                let mut registry = self.registry.lock().await;
                let entry = registry.get_mut(spawn_id)?;
                let runs = std::mem::take(&mut entry.running);
                for run in &runs {
                    run.request_kill(revert);
                }
                (entry.record.clone(), runs)
            };

            if runs.is_empty() {
                return Ok(0);
            }

            if record.execution_mode == ExecutionMode::Container {
                match self.backends.for_mode(record.execution_mode) {
                    Ok(backend) => {
                        if let Err(err) = backend.finalize_run(&record).await {
                            warn!(%err, "container stop before kill failed");
                        }
                    }
                    Err(err) => warn!(%err, "no backend to stop"),
                }
            }

            for run in &runs {
                if run.wait_exited(self.kill_wait).await {
                    info!(run_id = %run.run_id, pid = ?run.pid, "run killed");
                } else {
                    warn!(run_id = %run.run_id, pid = ?run.pid, "run did not settle within kill wait");
                }
            }
            Ok(runs.len())
        }
        .instrument(span)
        .await
    }

    /// Snapshot of every spawn and its running processes.
    pub async fn list(&self) -> Vec<SpawnStatus> {
        let now = Utc::now();
        let registry = self.registry.lock().await;
        registry
            .iter()
            .map(|entry| SpawnStatus {
                spawn_id: entry.record.spawn_id.clone(),
                execution_mode: entry.record.execution_mode,
                verbosity: entry.record.verbosity,
                runs: entry
                    .running
                    .iter()
                    .map(|run| (run.pid, run.elapsed(now)))
                    .collect(),
            })
            .collect()
    }

    /// Kill all runs without revert and persist the registry.
    pub async fn shutdown(&self) {
        let ids = self.registry.lock().await.ids();
        for spawn_id in ids {
            match self.kill_runs(&spawn_id, false).await {
                Ok(0) => {}
                Ok(count) => info!(%spawn_id, count, "runs stopped for shutdown"),
                Err(err) => warn!(%spawn_id, %err, "failed to stop runs for shutdown"),
            }
        }
        if let Err(err) = self.registry.lock().await.save() {
            error!(%err, "failed to persist registry on shutdown");
        }
    }

    fn check_runnable(&self, record: &SessionRecord) -> Result<()> {
        if !self.config.allows_provider(&record.provider) {
            return Err(AppError::InvalidConfig(format!(
                "this agent uses provider '{}', which is not allowed by current configuration",
                record.provider
            )));
        }
        if !self.config.allows_mode(record.execution_mode) {
            return Err(AppError::InvalidConfig(format!(
                "this agent is configured for {} execution, which is disabled",
                record.execution_mode
            )));
        }
        Ok(())
    }

    async fn drive_run(self: Arc<Self>, task: RunTask) {
        let RunTask {
            record,
            handle,
            mut child,
            mut lines,
            snapshot,
            target,
            backend,
        } = task;
        let spawn_id = record.spawn_id.as_str();
        let mut relay = Relay::new(
            spawn_id,
            record.verbosity,
            self.config.outbound.dump_unknown_events,
            record.conversation_ref.clone(),
        );
        let terminate = handle.terminate_token();

        // A killed agent's children may keep the pipes open, so reading stops
        // as soon as termination is requested.
        loop {
            tokio::select! {
                () = terminate.cancelled() => {
                    debug!("terminate requested, killing agent process");
                    if let Err(err) = child.start_kill() {
                        debug!(%err, "agent process already gone");
                    }
                    break;
                }
                line = lines.next() => match line {
                    None => break,
                    Some(Ok(line)) => {
                        let step = relay.ingest(&line);
                        if let Some(conversation_ref) = step.new_conversation_ref {
                            self.store_conversation_ref(spawn_id, Some(conversation_ref)).await;
                        }
                        if let Some(note) = step.notification {
                            let target = self.delivery_target(spawn_id, &target).await;
                            self.outbound.notify(&target, spawn_id, &note).await;
                        }
                    }
                    Some(Err(AppError::Io(err))) => {
                        warn!(%err, "agent output unreadable, ending run");
                        break;
                    }
                    Some(Err(err)) => warn!(%err, "skipping agent output line"),
                }
            }
        }

        let target_now = self.delivery_target(spawn_id, &target).await;
        self.outbound
            .notify(&target_now, spawn_id, &Notification::completion(spawn_id))
            .await;

        if let Err(err) = backend.finalize_run(&record).await {
            warn!(%err, "failed to finalize run");
        }
        match child.wait().await {
            Ok(status) => info!(status = %describe_status(status), "agent process exited"),
            Err(err) => warn!(%err, "failed to reap agent process"),
        }

        self.settle(&record, &handle, &snapshot, relay).await;
        handle.mark_exited();
    }

    /// Detach the run and commit or revert its transcript.
    async fn settle(&self, record: &SessionRecord, handle: &RunHandle, snapshot: &RunSnapshot, relay: Relay) {
        let spawn_id = record.spawn_id.as_str();
        let instructions = self.instructions().await;
        let mut registry = self.registry.lock().await;
        let Ok(entry) = registry.get_mut(spawn_id) else {
            info!("spawn deleted during run, nothing to reconcile");
            return;
        };
        entry.running.retain(|run| run.run_id != handle.run_id);
        let revert = handle.revert_requested();
        let current = entry.record.clone();

        if revert {
            match reconciler::revert(
                &self.transcripts,
                &self.agent_logs,
                spawn_id,
                snapshot,
                relay.conversation_ref(),
            ) {
                Ok(restored_ref) => {
                    if current.conversation_ref != restored_ref {
                        if let Err(err) = registry.update(spawn_id, |rec| rec.conversation_ref = restored_ref) {
                            error!(%err, "failed to persist reverted conversation reference");
                        }
                    }
                }
                Err(err) => error!(%err, "transcript revert failed"),
            }
        } else if let Err(err) = reconciler::commit(
            &self.transcripts,
            &current,
            snapshot,
            &instructions,
            relay.events(),
        ) {
            error!(%err, "transcript commit failed");
        }
    }

    async fn store_conversation_ref(&self, spawn_id: &str, conversation_ref: Option<String>) {
        let mut registry = self.registry.lock().await;
        match registry.update(spawn_id, |rec| rec.conversation_ref = conversation_ref) {
            Ok(()) => debug!("conversation reference stored"),
            Err(AppError::NotFound(_)) => debug!("spawn deleted, conversation reference dropped"),
            Err(err) => error!(%err, "failed to persist conversation reference"),
        }
    }

    /// Latest channel and user for the spawn, threaded under this run's request.
    async fn delivery_target(&self, spawn_id: &str, run_target: &NotificationTarget) -> NotificationTarget {
        let registry = self.registry.lock().await;
        registry
            .get(spawn_id)
            .ok()
            .and_then(|entry| entry.target.clone())
            .map_or_else(
                || run_target.clone(),
                |latest| NotificationTarget {
                    reply_to: run_target.reply_to.clone(),
                    ..latest
                },
            )
    }
}
