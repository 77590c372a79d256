//! Readiness detection for long-lived runtime commands.

#![cfg(unix)]

use std::time::Duration;

use spawn_relay::backend::command::run_until_sentinel;
use spawn_relay::AppError;

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_owned(), script.to_owned()]
}

#[tokio::test]
async fn sentinel_found_after_large_stderr_output() {
    let args = sh("yes starting-services | head -c 200000 >&2; echo READY; sleep 1");
    let ready = tokio::time::timeout(
        Duration::from_secs(10),
        run_until_sentinel("sh", &args, "READY"),
    )
    .await
    .expect("readiness must not stall behind stderr");
    assert!(ready.is_ok(), "{ready:?}");
}

#[tokio::test]
async fn sentinel_on_stderr_counts() {
    let args = sh("echo booting; echo READY >&2; sleep 1");
    run_until_sentinel("sh", &args, "READY")
        .await
        .expect("ready");
}

#[tokio::test]
async fn exit_without_sentinel_reports_output() {
    let args = sh("echo 'no image' >&2; exit 3");
    let err = run_until_sentinel("sh", &args, "READY")
        .await
        .expect_err("never ready");
    match err {
        AppError::Backend(message) => {
            assert!(message.contains("exit code 3"), "{message}");
            assert!(message.contains("no image"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
