//! Environment construction for agent processes.

use std::path::Path;

use tracing::warn;

use crate::{AppError, Result};

/// Host variables passed through when a spawn does not leak its environment.
pub const PASSTHROUGH_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "TMPDIR",
];

/// Parse a dotenv file.
///
/// Follows dotenv syntax: `export ` prefixes, quoting, escapes and
/// multi-line values inside double quotes, and `${VAR}` expansion against
/// earlier entries and the process environment. Malformed lines are logged
/// and skipped.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be opened or read.
pub fn parse_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let entries = dotenvy::from_path_iter(path).map_err(|err| {
        AppError::Config(format!("failed to read env file {}: {err}", path.display()))
    })?;
    collect_entries(entries, &path.display().to_string())
}

/// Parse dotenv syntax from a string, with the same rules as [`parse_env_file`].
///
/// # Errors
///
/// Returns `AppError::Config` if the input cannot be read.
pub fn parse_env_str(raw: &str) -> Result<Vec<(String, String)>> {
    collect_entries(dotenvy::from_read_iter(raw.as_bytes()), "inline env")
}

fn collect_entries(
    entries: impl Iterator<Item = std::result::Result<(String, String), dotenvy::Error>>,
    source: &str,
) -> Result<Vec<(String, String)>> {
    let mut parsed = Vec::new();
    for entry in entries {
        match entry {
            Ok(pair) => parsed.push(pair),
            Err(dotenvy::Error::LineParse(line, index)) => {
                warn!(source, line = %line, index, "skipping malformed env file line");
            }
            Err(err) => {
                return Err(AppError::Config(format!(
                    "failed to read env file {source}: {err}"
                )))
            }
        }
    }
    Ok(parsed)
}

/// Minimal environment for a non-leaking host agent: the passthrough
/// allow-list from the current process plus the optional env file.
///
/// # Errors
///
/// Returns `AppError::Config` if the env file cannot be read.
pub fn minimal_host_env(env_file: Option<&Path>) -> Result<Vec<(String, String)>> {
    let mut env: Vec<(String, String)> = PASSTHROUGH_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| ((*key).to_owned(), value)))
        .collect();

    if let Some(path) = env_file {
        for (key, value) in parse_env_file(path)? {
            env.retain(|(existing, _)| *existing != key);
            env.push((key, value));
        }
    }

    Ok(env)
}

/// Variables generated for container agents; they win over leaked host values.
#[must_use]
pub fn generated_container_env() -> Vec<(String, String)> {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".into());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".into());
    vec![("CODEX_HOME".into(), home), ("CODEX_USER".into(), user)]
}

/// Expand `[(k, v)]` into repeated `-e k=v` runtime flags.
#[must_use]
pub fn env_flags(env: &[(String, String)]) -> Vec<String> {
    env.iter()
        .flat_map(|(key, value)| ["-e".to_owned(), format!("{key}={value}")])
        .collect()
}
