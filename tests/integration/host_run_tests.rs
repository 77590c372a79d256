//! End-to-end host runs against a fake agent script: relay, completion,
//! transcript commit, and reverting kills.

#![cfg(unix)]

use spawn_relay::models::transcript::TranscriptItem;

use super::test_helpers::{
    conversation_ref, host_spawn, orchestrator, target, wait_idle, wait_until, write_agent,
    Sandbox,
};

const STARTED: &str = r#"{"type":"thread.started","thread_id":"t-1"}"#;

fn say(text: &str) -> String {
    format!(
        r#"{{"type":"item.completed","item":{{"id":"m","type":"agent_message","text":"{text}"}}}}"#
    )
}

fn shell(id: &str, command: &str, output: &str) -> [String; 2] {
    [
        format!(
            r#"{{"type":"item.started","item":{{"id":"{id}","type":"command_execution","command":"{command}"}}}}"#
        ),
        format!(
            r#"{{"type":"item.completed","item":{{"id":"{id}","type":"command_execution","command":"{command}","aggregated_output":"{output}","exit_code":0}}}}"#
        ),
    ]
}

fn emit(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|line| format!("printf '%s\\n' '{line}'"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Completed run ────────────────────────────────────────────

#[tokio::test]
async fn completed_run_relays_answer_and_commits_transcript() {
    let sandbox = Sandbox::new();
    write_agent(&sandbox.agent_script(), &emit(&[STARTED, &say("hi!")]));
    let (orch, sink) = orchestrator(sandbox.host_config());
    orch.create_session("alpha", &host_spawn(&sandbox.path("work")))
        .await
        .expect("create");

    orch.start_run("alpha", "greet", &[], target())
        .await
        .expect("start");
    wait_idle(&orch, "alpha").await;

    let sent = sink.messages();
    assert_eq!(sent.len(), 2, "answer then completion: {sent:?}");
    assert!(sent[0].text.contains("hi!"));
    assert!(!sent[0].text.contains("<@"), "answers are not critical");
    assert!(sent[1].text.starts_with("<@U_OWNER> "));
    assert!(sent[1].text.contains("COMPLETED"));
    assert!(sent
        .iter()
        .all(|msg| msg.reply_to.as_deref() == Some("1700000000.000100")));

    assert_eq!(conversation_ref(&orch, "alpha").await.as_deref(), Some("t-1"));
    let transcript = orch
        .transcripts
        .load("alpha")
        .expect("readable")
        .expect("committed");
    assert_eq!(transcript.id, "t-1");
    assert_eq!(
        transcript.items,
        vec![TranscriptItem::Message {
            role: "assistant".into(),
            text: "hi!".into(),
        }]
    );
}

// ── Second turn reusing item ids ─────────────────────────────

#[tokio::test]
async fn second_turn_keeps_tool_calls_that_reuse_item_ids() {
    let sandbox = Sandbox::new();
    let [started, completed] = shell("item_0", "ls", "a.txt");
    write_agent(
        &sandbox.agent_script(),
        &emit(&[STARTED, &started, &completed, &say("one")]),
    );
    let (orch, _sink) = orchestrator(sandbox.host_config());
    orch.create_session("alpha", &host_spawn(&sandbox.path("work")))
        .await
        .expect("create");

    orch.start_run("alpha", "list", &[], target())
        .await
        .expect("start 1");
    wait_idle(&orch, "alpha").await;

    let [started, completed] = shell("item_0", "pwd", "work");
    write_agent(
        &sandbox.agent_script(),
        &emit(&[&started, &completed, &say("two")]),
    );
    orch.start_run("alpha", "where", &[], target())
        .await
        .expect("start 2");
    wait_idle(&orch, "alpha").await;

    let transcript = orch
        .transcripts
        .load("alpha")
        .expect("readable")
        .expect("committed");
    let outputs: Vec<&str> = transcript
        .items
        .iter()
        .filter_map(|item| match item {
            TranscriptItem::ToolResult { output, .. } => Some(output.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(outputs, vec!["a.txt", "work"]);
    assert_eq!(transcript.items.len(), 6);
}

// ── Reverting kill on the first turn ─────────────────────────

#[tokio::test]
async fn first_turn_revert_leaves_no_transcript_and_no_reference() {
    let sandbox = Sandbox::new();
    write_agent(
        &sandbox.agent_script(),
        &format!("{}\nexec sleep 30", emit(&[STARTED])),
    );
    let (orch, _sink) = orchestrator(sandbox.host_config());
    orch.create_session("alpha", &host_spawn(&sandbox.path("work")))
        .await
        .expect("create");

    orch.start_run("alpha", "long task", &[], target())
        .await
        .expect("start");
    let mut seen = false;
    for _ in 0..250 {
        if conversation_ref(&orch, "alpha").await.is_some() {
            seen = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(seen, "conversation reference never arrived");

    let killed = orch.kill_runs("alpha", true).await.expect("kill");
    assert_eq!(killed, 1);

    assert!(!orch.transcripts.path_for("alpha").exists());
    assert_eq!(conversation_ref(&orch, "alpha").await, None);
    assert!(orch.list().await[0].runs.is_empty());
}

// ── Reverting kill on a later turn ───────────────────────────

#[tokio::test]
async fn later_turn_revert_restores_transcript_bytes() {
    let sandbox = Sandbox::new();
    write_agent(&sandbox.agent_script(), &emit(&[STARTED, &say("first")]));
    let (orch, sink) = orchestrator(sandbox.host_config());
    orch.create_session("alpha", &host_spawn(&sandbox.path("work")))
        .await
        .expect("create");

    orch.start_run("alpha", "one", &[], target())
        .await
        .expect("start 1");
    wait_idle(&orch, "alpha").await;
    let before = std::fs::read(orch.transcripts.path_for("alpha")).expect("transcript");

    write_agent(
        &sandbox.agent_script(),
        &format!("{}\nexec sleep 30", emit(&[&say("second")])),
    );
    orch.start_run("alpha", "two", &[], target())
        .await
        .expect("start 2");
    assert!(wait_until(|| sink.count() >= 3).await, "second answer never relayed");

    assert_eq!(orch.kill_runs("alpha", true).await.expect("kill"), 1);

    let after = std::fs::read(orch.transcripts.path_for("alpha")).expect("transcript");
    assert_eq!(before, after);
    assert_eq!(conversation_ref(&orch, "alpha").await.as_deref(), Some("t-1"));
}

// ── Non-reverting kill ───────────────────────────────────────

#[tokio::test]
async fn kill_without_revert_commits_partial_output() {
    let sandbox = Sandbox::new();
    write_agent(
        &sandbox.agent_script(),
        &format!("{}\nexec sleep 30", emit(&[STARTED, &say("partial")])),
    );
    let (orch, sink) = orchestrator(sandbox.host_config());
    orch.create_session("alpha", &host_spawn(&sandbox.path("work")))
        .await
        .expect("create");

    orch.start_run("alpha", "task", &[], target())
        .await
        .expect("start");
    assert!(wait_until(|| sink.count() >= 1).await, "answer never relayed");

    assert_eq!(orch.kill_runs("alpha", false).await.expect("kill"), 1);

    let transcript = orch
        .transcripts
        .load("alpha")
        .expect("readable")
        .expect("committed");
    assert_eq!(transcript.items.len(), 1);
    assert_eq!(conversation_ref(&orch, "alpha").await.as_deref(), Some("t-1"));
}

// ── Kill with nothing running ────────────────────────────────

#[tokio::test]
async fn kill_idle_spawn_reports_zero_and_unknown_is_not_found() {
    let sandbox = Sandbox::new();
    let (orch, _sink) = orchestrator(sandbox.host_config());
    orch.create_session("alpha", &host_spawn(&sandbox.path("work")))
        .await
        .expect("create");

    assert_eq!(orch.kill_runs("alpha", true).await.expect("kill"), 0);
    assert!(matches!(
        orch.kill_runs("ghost", true).await,
        Err(spawn_relay::AppError::NotFound(_))
    ));
}
