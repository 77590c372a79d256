//! Registry create/get/update/remove with write-through persistence.

use std::path::{Path, PathBuf};

use proptest::prelude::*;
use spawn_relay::config::GlobalConfig;
use spawn_relay::models::session::{ExecutionMode, SessionConfig, Verbosity};
use spawn_relay::orchestrator::registry::{validate_new, Registry};
use spawn_relay::persistence::registry_store::RegistryStore;
use spawn_relay::AppError;

fn policy(state_dir: &Path) -> GlobalConfig {
    let raw = format!(
        "state_dir = '{}'\nallow_host_execution = true\nallowed_providers = ['openai', 'oss']\n[container]\nimage = 'agent'\n",
        state_dir.display()
    );
    GlobalConfig::from_toml_str(&raw).unwrap()
}

fn request(working_dir: PathBuf) -> SessionConfig {
    SessionConfig {
        provider: " oss ".into(),
        model: " gpt-5 ".into(),
        working_dir,
        execution_mode: ExecutionMode::Host,
        verbosity: Verbosity::Verbose,
        leak_env: false,
        create_dir: false,
    }
}

fn registry(policy: &GlobalConfig) -> Registry {
    Registry::load(RegistryStore::new(
        policy.registry_path(),
        policy.allowed_providers.clone(),
    ))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn create_then_get_round_trips(id in "[A-Za-z0-9_-]{1,64}") {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let mut registry = registry(&policy);

        let new = validate_new(&id, &request(dir.path().to_path_buf()), &policy).unwrap();
        registry.insert(new.record.clone()).unwrap();

        let entry = registry.get(&id).unwrap();
        prop_assert_eq!(&entry.record, &new.record);
        prop_assert_eq!(entry.record.provider.as_str(), "oss");
        prop_assert_eq!(entry.record.model.as_str(), "gpt-5");
        prop_assert!(entry.record.conversation_ref.is_none());

        let again = registry.insert(new.record);
        prop_assert!(matches!(again, Err(AppError::DuplicateId(_))));
    }
}

#[test]
fn every_mutation_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(dir.path());
    let mut reg = registry(&policy);
    let new = validate_new("alpha", &request(dir.path().to_path_buf()), &policy).unwrap();
    reg.insert(new.record).unwrap();
    reg
        .update("alpha", |record| record.conversation_ref = Some("thread-1".into()))
        .unwrap();

    let reloaded = registry(&policy);
    assert_eq!(
        reloaded.get("alpha").unwrap().record.conversation_ref.as_deref(),
        Some("thread-1")
    );

    reg.remove("alpha").unwrap();
    assert!(registry(&policy).is_empty());
    assert!(matches!(reg.remove("alpha"), Err(AppError::NotFound(_))));

    reg.clear().unwrap();
    assert!(!policy.registry_path().exists());
}

#[test]
fn persisted_form_has_no_runtime_fields() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(dir.path());
    let mut registry = registry(&policy);
    let new = validate_new("alpha", &request(dir.path().to_path_buf()), &policy).unwrap();
    registry.insert(new.record).unwrap();

    let raw = std::fs::read_to_string(policy.registry_path()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let entry = doc["alpha"].as_object().unwrap();
    let mut keys: Vec<&str> = entry.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec![
            "conversation_ref",
            "execution_mode",
            "leak_env",
            "model",
            "provider",
            "spawn_id",
            "verbosity",
            "working_dir",
        ]
    );
}

#[test]
fn validation_rejects_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(dir.path());
    let base = request(dir.path().to_path_buf());

    let bad_provider = SessionConfig {
        provider: "azure".into(),
        ..base.clone()
    };
    assert!(matches!(
        validate_new("a", &bad_provider, &policy),
        Err(AppError::InvalidConfig(_))
    ));

    let colon = SessionConfig {
        working_dir: dir.path().join("a:b"),
        create_dir: true,
        ..base.clone()
    };
    assert!(validate_new("a", &colon, &policy).is_err());
    assert!(!dir.path().join("a:b").exists());

    let missing = SessionConfig {
        working_dir: dir.path().join("nope"),
        ..base.clone()
    };
    assert!(validate_new("a", &missing, &policy).is_err());

    let leak = SessionConfig {
        leak_env: true,
        ..base.clone()
    };
    assert!(validate_new("a", &leak, &policy).is_err());

    assert!(matches!(
        validate_new("a b", &base, &policy),
        Err(AppError::InvalidId(_))
    ));
}

#[test]
fn missing_dir_with_create_flag_is_reported_not_created() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(dir.path());
    let wanted = dir.path().join("fresh");
    let config = SessionConfig {
        working_dir: wanted.clone(),
        create_dir: true,
        ..request(dir.path().to_path_buf())
    };
    let new = validate_new("a", &config, &policy).unwrap();
    assert!(new.create_dir);
    assert_eq!(new.record.working_dir, wanted);
    assert!(!wanted.exists());
}

#[test]
fn disabled_mode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let raw = format!(
        "state_dir = '{}'\n[container]\nimage = 'agent'\n",
        dir.path().display()
    );
    let policy = GlobalConfig::from_toml_str(&raw).unwrap();
    let config = SessionConfig {
        provider: "openai".into(),
        ..request(dir.path().to_path_buf())
    };
    let err = validate_new("a", &config, &policy).unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig(ref msg) if msg.contains("host")));
}
