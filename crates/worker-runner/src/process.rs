//! Worker process launch and exit monitoring

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SupervisorError};
use crate::platform;

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal (unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Identity of one live worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Process group holding the worker and everything it forks
    pub pgid: u32,
    pub started_at: DateTime<Utc>,
    /// Distinguishes successive runs of the same worker
    pub instance_id: Uuid,
}

/// What to execute for a worker
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added to the inherited environment, later entries win
    pub env: Vec<(String, String)>,
}

/// A launched worker whose exit is observed by a background monitor
#[derive(Debug, Clone)]
pub struct WorkerProcess {
    pub handle: ProcessHandle,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill: Arc<Notify>,
}

impl WorkerProcess {
    /// Spawn the process described by `spec` and start monitoring it.
    ///
    /// The monitor task owns the child; this handle only observes it.
    pub fn launch(spec: &LaunchSpec, stdout: Stdio, stderr: Stdio) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        platform::isolate_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::spawn_failed_with_source(
                format!("Failed to spawn {}: {}", spec.program.display(), e),
                e,
            )
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            message: "process exited before its pid was read".to_string(),
            source: None,
        })?;

        let handle = ProcessHandle {
            pid,
            pgid: pid,
            started_at: Utc::now(),
            instance_id: Uuid::new_v4(),
        };
        info!(pid, program = ?spec.program, args = ?spec.args, cwd = ?spec.cwd, "worker process spawned");

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        let kill_requested = Arc::clone(&kill);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_requested.notified() => {
                    debug!(pid, "kill requested");
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "failed to kill worker process");
                    }
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for worker process");
                    ExitInfo::unknown()
                }
            };
            debug!(pid, %exit, "worker process exited");
            let _ = exit_tx.send(Some(exit));
        });

        Ok(Self {
            handle,
            exit_rx,
            kill,
        })
    }

    /// Exit information, if the process has already ended
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Wait up to `within` for the process to end
    pub async fn wait_exit(&self, within: Duration) -> Option<ExitInfo> {
        let mut rx = self.exit_rx.clone();
        let _ = tokio::time::timeout(within, rx.wait_for(Option::is_some)).await;
        let exit = *rx.borrow();
        exit
    }

    /// Wait for the process to end however long it takes
    pub async fn exited(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.unwrap_or_else(ExitInfo::unknown),
            Err(_) => ExitInfo::unknown(),
        };
        exit
    }

    /// Ask the monitor to kill the direct child
    pub fn request_kill(&self) {
        self.kill.notify_one();
    }
}
