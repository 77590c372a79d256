//! Run handle shared between the supervisor and a run's reader task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-run flags set by `kill` and observed by the reader task.
#[derive(Debug, Default)]
struct RunControl {
    /// Fired by `kill`; the reader terminates the child when it sees it.
    terminate: CancellationToken,
    /// Fired by the reader once the child has been reaped and reconciled.
    exited: CancellationToken,
    /// Set synchronously by `kill`; read at end of stream to pick revert.
    revert: AtomicBool,
}

/// Handle to one in-flight agent process.
///
/// Clones share the same control flags.
#[derive(Debug, Clone)]
pub struct RunHandle {
    /// Unique run identifier used in logs.
    pub run_id: String,
    /// OS process id, if the platform reported one.
    pub pid: Option<u32>,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    control: Arc<RunControl>,
}

impl RunHandle {
    /// Create a handle for a freshly launched process.
    #[must_use]
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            pid,
            started_at: Utc::now(),
            control: Arc::new(RunControl::default()),
        }
    }

    /// Mark the run killed. With `revert`, its output is discarded on exit.
    pub fn request_kill(&self, revert: bool) {
        if revert {
            self.control.revert.store(true, Ordering::SeqCst);
        }
        self.control.terminate.cancel();
    }

    /// Whether a reverting kill was requested.
    #[must_use]
    pub fn revert_requested(&self) -> bool {
        self.control.revert.load(Ordering::SeqCst)
    }

    /// Token fired when the run must terminate its process.
    #[must_use]
    pub fn terminate_token(&self) -> CancellationToken {
        self.control.terminate.clone()
    }

    /// Signal that the process was reaped and the run fully settled.
    pub fn mark_exited(&self) {
        self.control.exited.cancel();
    }

    /// Whether the run has fully settled.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.control.exited.is_cancelled()
    }

    /// Wait until the run settles, up to `limit`. Returns `true` on exit.
    pub async fn wait_exited(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.control.exited.cancelled())
            .await
            .is_ok()
    }

    /// Time elapsed since the run started, clamped at zero.
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}

/// Render a duration the way `/list` shows it: `1h2m3s`, `2m3s`, or `3s`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, rem) = (secs / 3600, secs % 3600);
    let (m, s) = (rem / 60, rem % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
