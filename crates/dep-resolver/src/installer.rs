//! Package installation through the interpreter's `pip`

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bh_core::LogSink;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ResolveError, Result};

/// Deadline for a single installer run
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

const STDLIB_QUERY: &str = "import sysconfig; print(sysconfig.get_path('stdlib'))";
const STDLIB_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// What an installer run amounted to.
///
/// Failures are advisory: the worker may still start with whatever is
/// already installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Skipped,
    Failed(String),
}

impl InstallOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => f.write_str("installed"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Runs `<python> -m pip install ...` with a deadline
#[derive(Debug, Clone)]
pub struct Installer {
    python: PathBuf,
    timeout: Duration,
}

impl Installer {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install `packages` in one batch
    pub async fn install_packages(
        &self,
        packages: &[String],
        cwd: &Path,
        log: Option<&LogSink>,
    ) -> InstallOutcome {
        if packages.is_empty() {
            return InstallOutcome::Skipped;
        }
        let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
        args.extend(packages.iter().cloned());
        self.outcome(self.run(&args, cwd, log).await)
    }

    /// Install everything declared in a requirements file.
    ///
    /// Skipped when the file does not exist.
    pub async fn install_requirements(
        &self,
        requirements: &Path,
        cwd: &Path,
        log: Option<&LogSink>,
    ) -> InstallOutcome {
        if !requirements.is_file() {
            debug!(path = ?requirements, "no requirements file; skipping install");
            return InstallOutcome::Skipped;
        }
        let args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "-r".to_string(),
            requirements.to_string_lossy().into_owned(),
        ];
        self.outcome(self.run(&args, cwd, log).await)
    }

    fn outcome(&self, result: Result<()>) -> InstallOutcome {
        match result {
            Ok(()) => InstallOutcome::Installed,
            Err(e) => {
                warn!(python = ?self.python, error = %e, "dependency install failed");
                InstallOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run(&self, args: &[String], cwd: &Path, log: Option<&LogSink>) -> Result<()> {
        let (stdout, stderr) = match log {
            Some(sink) => sink.helper_stdio()?,
            None => (Stdio::null(), Stdio::null()),
        };

        info!(python = ?self.python, ?args, "running installer");
        let mut child = Command::new(&self.python)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ResolveError::installer_failed_with_source("Failed to spawn installer", e))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ResolveError::InstallerTimeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            return Err(ResolveError::installer_failed(format!(
                "pip exited with {status}"
            )));
        }
        Ok(())
    }
}

/// Ask the interpreter where its standard library lives.
///
/// Returns `None` when the interpreter cannot be run or answers with
/// something that is not a directory.
pub async fn discover_stdlib_dir(python: &Path) -> Option<PathBuf> {
    let output = Command::new(python)
        .args(["-c", STDLIB_QUERY])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(STDLIB_QUERY_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            debug!(python = ?python, status = %output.status, "stdlib query failed");
            return None;
        }
        Ok(Err(e)) => {
            debug!(python = ?python, error = %e, "could not run interpreter");
            return None;
        }
        Err(_) => {
            debug!(python = ?python, "stdlib query timed out");
            return None;
        }
    };

    let dir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    dir.is_dir().then_some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::LogStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_batch_is_skipped() {
        let dir = TempDir::new().unwrap();
        let installer = Installer::new("python3");
        assert_eq!(
            installer.install_packages(&[], dir.path(), None).await,
            InstallOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_missing_requirements_is_skipped() {
        let dir = TempDir::new().unwrap();
        let installer = Installer::new("python3");
        let outcome = installer
            .install_requirements(&dir.path().join("requirements.txt"), dir.path(), None)
            .await;
        assert_eq!(outcome, InstallOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_softly() {
        let dir = TempDir::new().unwrap();
        let installer = Installer::new("/nonexistent/python-for-tests");
        let outcome = installer
            .install_packages(&["requests".to_string()], dir.path(), None)
            .await;
        assert!(outcome.is_failed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_maps_to_outcome() {
        let dir = TempDir::new().unwrap();
        let requirements = dir.path().join("requirements.txt");
        std::fs::write(&requirements, "requests\n").unwrap();

        let ok = Installer::new("true")
            .install_requirements(&requirements, dir.path(), None)
            .await;
        assert_eq!(ok, InstallOutcome::Installed);

        let failed = Installer::new("false")
            .install_requirements(&requirements, dir.path(), None)
            .await;
        assert!(failed.is_failed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_and_log_redirect() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("fake-python");
        std::fs::write(&fake, "#!/bin/sh\necho installing \"$@\"\nsleep 5\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = LogStore::for_dir(dir.path());
        let sink = store.open_sink().unwrap();

        let outcome = Installer::new(&fake)
            .with_timeout(Duration::from_millis(500))
            .install_packages(&["aiogram".to_string()], dir.path(), Some(&sink))
            .await;
        match outcome {
            InstallOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("Expected Failed, got: {:?}", other),
        }

        let log = std::fs::read_to_string(store.path()).unwrap();
        assert!(log.contains("installing -m pip install aiogram"));
    }

    #[tokio::test]
    async fn test_discover_stdlib_dir_without_interpreter() {
        assert!(discover_stdlib_dir(Path::new("/nonexistent/python-for-tests"))
            .await
            .is_none());
    }
}
