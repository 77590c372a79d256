//! Registry file loading: per-entry validation and normalization.

use serde_json::json;
use spawn_relay::models::session::{ExecutionMode, Verbosity};
use spawn_relay::persistence::registry_store::RegistryStore;

fn store(dir: &tempfile::TempDir) -> RegistryStore {
    RegistryStore::new(dir.path().join("spawns.json"), vec!["openai".into()])
}

fn entry(id: &str) -> serde_json::Value {
    json!({
        "spawn_id": id,
        "conversation_ref": null,
        "provider": "openai",
        "model": "default",
        "working_dir": "/tmp/w",
        "execution_mode": "docker",
        "verbosity": "answers",
        "leak_env": false,
    })
}

#[test]
fn malformed_entries_are_dropped_individually() {
    let dir = tempfile::tempdir().unwrap();
    let mut missing_key = entry("missing");
    missing_key.as_object_mut().unwrap().remove("model");
    let mut bad_provider = entry("provider");
    bad_provider["provider"] = json!("azure");
    let mut bad_mode = entry("mode");
    bad_mode["execution_mode"] = json!("vm");

    let doc = json!({
        "good": entry("good"),
        "missing": missing_key,
        "provider": bad_provider,
        "mode": bad_mode,
        "mismatch": entry("other"),
        "scalar": 5,
        "bad id": entry("bad id"),
    });
    std::fs::write(dir.path().join("spawns.json"), doc.to_string()).unwrap();

    let records = store(&dir).load();
    assert_eq!(records.keys().collect::<Vec<_>>(), vec!["good"]);
    let good = &records["good"];
    assert_eq!(good.execution_mode, ExecutionMode::Container);
    assert_eq!(good.verbosity, Verbosity::Answers);
}

#[test]
fn values_are_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let mut raw = entry("a");
    raw["provider"] = json!(" openai ");
    raw["verbosity"] = json!("VERBOSE");
    raw["leak_env"] = json!(1);
    raw["model"] = json!(" gpt ");
    std::fs::write(dir.path().join("spawns.json"), json!({ "a": raw }).to_string()).unwrap();

    let record = &store(&dir).load()["a"];
    assert_eq!(record.provider, "openai");
    assert_eq!(record.model, "gpt");
    assert_eq!(record.verbosity, Verbosity::Verbose);
    assert!(record.leak_env);
}

#[test]
fn legacy_conversation_key_is_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let mut raw = entry("a");
    let object = raw.as_object_mut().unwrap();
    object.remove("conversation_ref");
    object.insert("codex_session_id".into(), json!("thread-9"));
    std::fs::write(dir.path().join("spawns.json"), json!({ "a": raw }).to_string()).unwrap();

    assert_eq!(
        store(&dir).load()["a"].conversation_ref.as_deref(),
        Some("thread-9")
    );
}

#[test]
fn unreadable_or_non_object_files_yield_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(store(&dir).load().is_empty());

    std::fs::write(dir.path().join("spawns.json"), "[1, 2]").unwrap();
    assert!(store(&dir).load().is_empty());

    std::fs::write(dir.path().join("spawns.json"), "{ not json").unwrap();
    assert!(store(&dir).load().is_empty());
}

#[test]
fn save_then_load_keeps_every_record() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("spawns.json"),
        json!({ "a": entry("a"), "b": entry("b") }).to_string(),
    )
    .unwrap();
    let store = store(&dir);
    let records = store.load();
    store.save(records.values()).unwrap();
    assert_eq!(store.load(), records);

    store.remove_file().unwrap();
    store.remove_file().unwrap();
    assert!(!store.path().exists());
}
