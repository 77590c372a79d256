//! Relay verbosity policy and notification rendering.

use spawn_relay::models::session::Verbosity;
use spawn_relay::relay::format::Notification;
use spawn_relay::relay::reader::Relay;

const MESSAGE: &str = r#"{"type":"item.completed","item":{"id":"i1","type":"agent_message","text":"done"}}"#;
const REASONING: &str = r#"{"type":"item.completed","item":{"id":"i2","type":"reasoning","text":"pondering"}}"#;
const COMMAND: &str = r#"{"type":"item.started","item":{"id":"i3","type":"command_execution","command":"ls -la"}}"#;
const USAGE: &str = r#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":2}}"#;
const FAILED: &str = r#"{"type":"turn.failed","error":{"message":"boom"}}"#;
const MYSTERY: &str = r#"{"type":"something.new","x":1}"#;

fn actions(verbosity: Verbosity, dump_unknown: bool) -> Vec<&'static str> {
    let mut relay = Relay::new("alpha", verbosity, dump_unknown, None);
    [MESSAGE, REASONING, COMMAND, USAGE, FAILED, MYSTERY]
        .iter()
        .filter_map(|line| relay.ingest(line).notification)
        .map(|note| note.action)
        .collect()
}

#[test]
fn answers_policy_keeps_responses_usage_and_errors() {
    assert_eq!(
        actions(Verbosity::Answers, true),
        vec![" responded", " used tokens", " error"]
    );
}

#[test]
fn verbose_policy_adds_thoughts_and_tools() {
    assert_eq!(
        actions(Verbosity::Verbose, false),
        vec![" responded", " thought", " started tool", " used tokens", " error"]
    );
}

#[test]
fn unknown_events_are_dumped_only_when_verbose_and_enabled() {
    assert_eq!(actions(Verbosity::Verbose, true).last(), Some(&" emitted"));
}

#[test]
fn malformed_lines_are_skipped_but_accumulation_continues() {
    let mut relay = Relay::new("alpha", Verbosity::Answers, false, None);
    assert!(relay.ingest("not json at all").notification.is_none());
    assert!(relay.ingest("   ").notification.is_none());
    assert!(relay.ingest(MESSAGE).notification.is_some());
    assert_eq!(relay.events().len(), 1);
}

#[test]
fn known_conversation_ref_is_not_reported_again() {
    let line = r#"{"type":"thread.started","thread_id":"t-1"}"#;
    let mut relay = Relay::new("alpha", Verbosity::Answers, false, Some("t-1".into()));
    assert_eq!(relay.ingest(line).new_conversation_ref, None);
    assert_eq!(relay.conversation_ref(), Some("t-1"));
}

#[test]
fn legacy_escaped_payload_relays_the_message() {
    let line = r#"{"msg":"{\"type\":\"agent_message\",\"message\":\"legacy hi\"}"}"#;
    let mut relay = Relay::new("alpha", Verbosity::Answers, false, None);
    let note = relay.ingest(line).notification.expect("notification");
    assert_eq!(note.text, "legacy hi");
}

#[test]
fn only_critical_notices_mention_the_requester() {
    let done = Notification::completion("alpha");
    assert_eq!(
        done.render("alpha", Some("U1")),
        "<@U1> **alpha**:\nAGENT **alpha** COMPLETED HIS MISSION!"
    );

    let mut relay = Relay::new("alpha", Verbosity::Answers, false, None);
    let note = relay.ingest(MESSAGE).notification.expect("notification");
    assert_eq!(note.render("alpha", Some("U1")), "**alpha** responded:\ndone");
}
