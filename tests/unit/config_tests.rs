//! Global configuration parsing and validation.

use spawn_relay::config::GlobalConfig;
use spawn_relay::models::session::{ExecutionMode, Verbosity};
use spawn_relay::AppError;

fn parse(dir: &tempfile::TempDir, extra: &str) -> spawn_relay::Result<GlobalConfig> {
    let raw = format!(
        "state_dir = '{}'\n{extra}",
        dir.path().join("state").display()
    );
    GlobalConfig::from_toml_str(&raw)
}

#[test]
fn container_defaults_need_an_image() {
    let dir = tempfile::tempdir().unwrap();
    let err = parse(&dir, "").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("container.image")));

    let config = parse(&dir, "[container]\nimage = 'agent:latest'\n").unwrap();
    assert_eq!(config.default_execution_mode, ExecutionMode::Container);
    assert_eq!(config.default_verbosity, Verbosity::Answers);
    assert_eq!(config.allowed_providers, vec!["openai".to_owned()]);
    assert_eq!(config.outbound.message_limit, 1950);
    assert!(config.outbound.reply_to_request);
    assert_eq!(config.container.ready_sentinel, "[==== DONE ====]");
}

#[test]
fn state_dir_is_created_and_canonical() {
    let dir = tempfile::tempdir().unwrap();
    let config = parse(&dir, "[container]\nimage = 'agent'\n").unwrap();
    assert!(config.state_dir.is_dir());
    assert!(config.state_dir.is_absolute());
    assert_eq!(config.registry_path(), config.state_dir.join("spawns.json"));
    assert_eq!(config.transcripts_dir(), config.state_dir.join("transcripts"));
}

#[test]
fn providers_are_trimmed_and_default_must_be_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let config = parse(
        &dir,
        "allowed_providers = [' openai ', 'oss']\ndefault_provider = ' oss'\n[container]\nimage = 'a'\n",
    )
    .unwrap();
    assert!(config.allows_provider("oss"));
    assert_eq!(config.default_provider, "oss");

    let err = parse(&dir, "default_provider = 'azure'\n[container]\nimage = 'a'\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn at_least_one_mode_and_an_allowed_default() {
    let dir = tempfile::tempdir().unwrap();
    assert!(parse(&dir, "allow_container_execution = false\n").is_err());
    assert!(parse(
        &dir,
        "allow_container_execution = false\nallow_host_execution = true\n"
    )
    .is_err());

    let config = parse(
        &dir,
        "allow_container_execution = false\nallow_host_execution = true\ndefault_execution_mode = 'host'\n",
    )
    .unwrap();
    assert!(config.allows_mode(ExecutionMode::Host));
    assert!(!config.allows_mode(ExecutionMode::Container));
}

#[test]
fn docker_is_accepted_as_container_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = parse(&dir, "default_execution_mode = 'docker'\n[container]\nimage = 'a'\n").unwrap();
    assert_eq!(config.default_execution_mode, ExecutionMode::Container);
}

#[test]
fn missing_env_file_and_zero_limit_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(parse(&dir, "agent_env_file = '/definitely/not/here.env'\n[container]\nimage = 'a'\n").is_err());
    assert!(parse(&dir, "[container]\nimage = 'a'\n[outbound]\nmessage_limit = 0\n").is_err());
}

#[test]
fn authorization_is_an_allow_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = parse(&dir, "authorized_user_ids = ['U1']\n[container]\nimage = 'a'\n").unwrap();
    assert!(config.ensure_authorized("U1").is_ok());
    assert!(matches!(
        config.ensure_authorized("U2"),
        Err(AppError::Unauthorized(_))
    ));
}
