//! External command execution for container runtime control.
//!
//! Every command is awaited to completion. A non-zero exit status is logged
//! here; whether it is fatal is decided by the caller through
//! [`CommandOutput::ensure_success`].

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::process::{Child, Command};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Maximum line length read from runtime output.
const MAX_RUNTIME_LINE: usize = 64 * 1024;

/// Output lines kept for the error when the sentinel never appears.
const ERROR_TAIL_LINES: usize = 20;

type OutputLines = BoxStream<'static, std::result::Result<String, LinesCodecError>>;

/// Captured result of an external command.
#[derive(Debug)]
pub struct CommandOutput {
    /// Rendered command line, for logs and errors.
    pub command_line: String,
    /// Exit status.
    pub status: ExitStatus,
    /// Standard output followed by standard error.
    pub output: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Turn a non-zero exit into `AppError::Backend`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` carrying the exit code and output.
    pub fn ensure_success(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(AppError::Backend(format!(
                "`{}` failed with {}: {}",
                self.command_line,
                describe_status(self.status),
                self.output.trim()
            )))
        }
    }
}

/// Run `program args…` to completion with stdin held open.
///
/// When `silent` is set, a failing exit is logged at `DEBUG` instead of
/// `WARN`; this is used for stops that are expected to fail when the
/// container is already down.
///
/// # Errors
///
/// Returns `AppError::Backend` only if the process cannot be spawned or
/// awaited. A non-zero exit is reported through the returned status.
pub async fn run(program: &str, args: &[String], silent: bool) -> Result<CommandOutput> {
    let command_line = render(program, args);
    info!(command = %command_line, "running external command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Backend(format!("failed to spawn `{command_line}`: {err}")))?;

    let raw = child
        .wait_with_output()
        .await
        .map_err(|err| AppError::Backend(format!("failed to await `{command_line}`: {err}")))?;

    let mut output = String::from_utf8_lossy(&raw.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&raw.stderr));

    if !raw.status.success() {
        let status = describe_status(raw.status);
        if silent {
            debug!(command = %command_line, status = %status, "external command failed (ignored)");
        } else {
            warn!(
                command = %command_line,
                status = %status,
                output = %output.trim(),
                "external command failed"
            );
        }
    }

    Ok(CommandOutput {
        command_line,
        status: raw.status,
        output,
    })
}

/// Run a long-lived command and return once `sentinel` appears in its output.
///
/// stdout and stderr are read as one merged stream, so a noisy stderr cannot
/// stall the process before it reports readiness. The process keeps running
/// afterwards; its remaining output is drained and logged by a background
/// task. End of output before the sentinel is fatal.
///
/// # Errors
///
/// Returns `AppError::Backend` on spawn failure or when the stream ends
/// without the sentinel.
pub async fn run_until_sentinel(program: &str, args: &[String], sentinel: &str) -> Result<()> {
    let command_line = render(program, args);
    info!(command = %command_line, %sentinel, "running command until readiness sentinel");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::Backend(format!("failed to spawn `{command_line}`: {err}")))?;

    let mut lines = merged_output(&mut child)?;
    let mut tail: VecDeque<String> = VecDeque::with_capacity(ERROR_TAIL_LINES);
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                debug!(command = %command_line, line = %line, "entrypoint output");
                if line.contains(sentinel) {
                    tokio::spawn(drain(command_line, lines, child));
                    return Ok(());
                }
                if tail.len() == ERROR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Err(err) => {
                warn!(command = %command_line, %err, "unreadable entrypoint output, skipping");
            }
        }
    }

    let status = child.wait().await.ok().map(describe_status);
    Err(AppError::Backend(format!(
        "`{command_line}` exited before readiness sentinel ({}): {}",
        status.unwrap_or_else(|| "status unknown".into()),
        Vec::from(tail).join("\n").trim()
    )))
}

fn merged_output(child: &mut Child) -> Result<OutputLines> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Backend("failed to capture runtime stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Backend("failed to capture runtime stderr".into()))?;
    let codec = || LinesCodec::new_with_max_length(MAX_RUNTIME_LINE);
    Ok(stream::select(
        FramedRead::new(stdout, codec()),
        FramedRead::new(stderr, codec()),
    )
    .boxed())
}

async fn drain(command_line: String, mut lines: OutputLines, mut child: Child) {
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => debug!(command = %command_line, line = %line, "entrypoint output"),
            Err(err) => debug!(command = %command_line, %err, "unreadable entrypoint output"),
        }
    }
    match child.wait().await {
        Ok(status) => debug!(
            command = %command_line,
            status = %describe_status(status),
            "attached command exited"
        ),
        Err(err) => warn!(command = %command_line, %err, "failed to reap attached command"),
    }
}

/// Human-readable exit status.
#[must_use]
pub fn describe_status(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exit code {code}"),
    )
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
