//! Process supervisor - owns the live worker table

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bh_core::{check_env_len, LogSink, LogStore, LogTail, WorkerId, WorkerStatus};
use chrono::{DateTime, Utc};
use dep_resolver::{
    discover_stdlib_dir, merge_requirements, DependencyResolver, InstallOutcome, Installer,
    REQUIREMENTS_FILE_NAME,
};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::platform::{self, GroupSignal};
use crate::prepare::{PrepareReport, SourcePreparer};
use crate::process::{ExitInfo, LaunchSpec, ProcessHandle, WorkerProcess};

/// How long to wait for the group to die after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Result of a successful start
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub entry: PathBuf,
    /// Packages detected in the source tree
    pub dependencies: Vec<String>,
    /// Outcome of the dependency install, as text
    pub install: String,
    /// Non-fatal problems met along the way
    pub warnings: Vec<String>,
}

/// Result of a successful stop
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub worker_id: WorkerId,
    /// SIGKILL was needed
    pub forced: bool,
    pub exit: Option<ExitInfo>,
}

type LiveMap = Arc<RwLock<HashMap<WorkerId, WorkerProcess>>>;

/// Starts, stops and tracks worker processes
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    preparer: SourcePreparer,
    installer: Installer,
    /// Live processes by worker id
    live: LiveMap,
    /// Serializes start/stop per worker id
    locks: Mutex<HashMap<WorkerId, Arc<Mutex<()>>>>,
    stdlib_dir: OnceCell<Option<PathBuf>>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let preparer = SourcePreparer::new(config.preparer.clone());
        let installer = Installer::new(&config.python).with_timeout(config.install_timeout);
        Self {
            config,
            preparer,
            installer,
            live: Arc::new(RwLock::new(HashMap::new())),
            locks: Mutex::new(HashMap::new()),
            stdlib_dir: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    async fn lock_for(&self, worker_id: &WorkerId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(worker_id.clone()).or_default())
    }

    /// Forget the id's lock once nobody else is waiting on it
    async fn release_lock(&self, worker_id: &WorkerId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the table, one in `lock`
        if Arc::strong_count(&lock) == 2 {
            locks.remove(worker_id);
        }
    }

    async fn stdlib_dir(&self) -> Option<PathBuf> {
        self.stdlib_dir
            .get_or_init(|| discover_stdlib_dir(&self.config.python))
            .await
            .clone()
    }

    /// Prepare, resolve, install and launch a worker.
    ///
    /// Succeeds only if the process is still alive after the health-check
    /// window; otherwise nothing is registered and the log tail is returned
    /// in [`SupervisorError::CrashedOnStart`].
    pub async fn start(
        &self,
        worker_id: &WorkerId,
        source_dir: &Path,
        credential: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<StartReport> {
        check_env_len(env.len()).map_err(|e| SupervisorError::configuration(e.to_string()))?;

        let lock = self.lock_for(worker_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(worker_id, source_dir, credential, env).await
        };
        self.release_lock(worker_id, lock).await;
        result
    }

    async fn start_locked(
        &self,
        worker_id: &WorkerId,
        source_dir: &Path,
        credential: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<StartReport> {
        if self.live.read().await.contains_key(worker_id) {
            return Err(SupervisorError::AlreadyRunning {
                worker_id: worker_id.to_string(),
            });
        }

        let entry = find_entry(source_dir, &self.config.entry_file)?.ok_or_else(|| {
            SupervisorError::NoEntryPoint {
                path: source_dir.to_path_buf(),
            }
        })?;

        info!(worker_id = %worker_id, entry = ?entry, "starting worker");
        let mut sink = LogStore::for_dir(source_dir).open_sink()?;
        let mut warnings = Vec::new();

        sink.line(format!("preparing {}", entry.display()))?;
        match self.prepare(&entry, credential).await {
            Ok(report) => {
                for warning in report.warnings() {
                    warn!(worker_id = %worker_id, "{}", warning);
                    sink.line(format!("warning: {warning}"))?;
                    warnings.push(warning);
                }
            }
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "source preparation failed");
                sink.line(format!("warning: source preparation failed: {e}"))?;
                warnings.push(format!("source preparation failed: {e}"));
            }
        }

        sink.line("resolving dependencies")?;
        let dependencies = self
            .resolve_and_merge(source_dir, &mut sink, &mut warnings)
            .await?;

        let install = self.install(source_dir, &mut sink).await?;
        if let InstallOutcome::Failed(reason) = &install {
            warnings.push(format!("dependency install failed: {reason}"));
        }

        let spec = self.launch_spec(&entry, source_dir, credential, env);
        sink.line(format!(
            "launching {} {} in {}",
            spec.program.display(),
            spec.args.join(" "),
            source_dir.display()
        ))?;
        let (stdout, stderr) = sink.into_child_stdio()?;
        let process = WorkerProcess::launch(&spec, stdout, stderr)?;

        if let Some(exit) = process.wait_exit(self.config.health_check).await {
            return Err(self.crashed(worker_id, source_dir, &process, exit));
        }

        let crashed = {
            let mut live = self.live.write().await;
            match process.exit_info() {
                Some(exit) => Some(exit),
                None => {
                    live.insert(worker_id.clone(), process.clone());
                    None
                }
            }
        };
        if let Some(exit) = crashed {
            return Err(self.crashed(worker_id, source_dir, &process, exit));
        }

        self.spawn_reaper(worker_id.clone(), source_dir.to_path_buf(), process.clone());

        info!(
            worker_id = %worker_id,
            pid = process.handle.pid,
            dependencies = dependencies.len(),
            warnings = warnings.len(),
            "worker started"
        );
        Ok(StartReport {
            worker_id: worker_id.clone(),
            pid: process.handle.pid,
            instance_id: process.handle.instance_id,
            started_at: process.handle.started_at,
            entry,
            dependencies,
            install: install.to_string(),
            warnings,
        })
    }

    async fn prepare(&self, entry: &Path, credential: &str) -> Result<PrepareReport> {
        let preparer = self.preparer.clone();
        let entry = entry.to_path_buf();
        let credential = credential.to_string();
        tokio::task::spawn_blocking(move || preparer.prepare(&entry, &credential))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Resolution problems are reported, never returned
    async fn resolve_and_merge(
        &self,
        source_dir: &Path,
        sink: &mut LogSink,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<String>> {
        let mut resolver = DependencyResolver::new();
        if let Some(dir) = self.stdlib_dir().await {
            resolver = resolver.with_stdlib_dir(dir);
        }

        let dir = source_dir.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || {
            let resolution = resolver.resolve(&dir)?;
            let added =
                merge_requirements(&dir.join(REQUIREMENTS_FILE_NAME), &resolution.dependencies)?;
            Ok::<_, dep_resolver::ResolveError>((resolution, added))
        })
        .await
        .map_err(std::io::Error::other)?;

        match outcome {
            Ok((resolution, added)) => {
                for (path, message) in &resolution.skipped_files {
                    let warning = format!("could not analyze {}: {}", path.display(), message);
                    sink.line(format!("warning: {warning}"))?;
                    warnings.push(warning);
                }
                if added.is_empty() {
                    sink.line("all detected packages already declared")?;
                } else {
                    sink.line(format!("declared new packages: {}", added.join(", ")))?;
                }
                Ok(resolution.dependencies)
            }
            Err(e) => {
                warn!(source_dir = ?source_dir, error = %e, "dependency resolution failed");
                sink.line(format!("warning: dependency resolution failed: {e}"))?;
                warnings.push(format!("dependency resolution failed: {e}"));
                Ok(Vec::new())
            }
        }
    }

    async fn install(&self, source_dir: &Path, sink: &mut LogSink) -> Result<InstallOutcome> {
        if !self.config.install_dependencies {
            debug!(source_dir = ?source_dir, "dependency install disabled");
            return Ok(InstallOutcome::Skipped);
        }
        sink.line("installing dependencies")?;
        let outcome = self
            .installer
            .install_requirements(&source_dir.join(REQUIREMENTS_FILE_NAME), source_dir, Some(&*sink))
            .await;
        sink.line(format!("dependency install {outcome}"))?;
        Ok(outcome)
    }

    fn launch_spec(
        &self,
        entry: &Path,
        source_dir: &Path,
        credential: &str,
        env: &BTreeMap<String, String>,
    ) -> LaunchSpec {
        let entry_arg = entry
            .strip_prefix(source_dir)
            .unwrap_or(entry)
            .to_string_lossy()
            .into_owned();
        let mut args = self.config.python_args.clone();
        args.push(entry_arg);

        let mut child_env = vec![(self.config.credential_env_var.clone(), credential.to_string())];
        child_env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));

        LaunchSpec {
            program: self.config.python.clone(),
            args,
            cwd: source_dir.to_path_buf(),
            env: child_env,
        }
    }

    fn crashed(
        &self,
        worker_id: &WorkerId,
        source_dir: &Path,
        process: &WorkerProcess,
        exit: ExitInfo,
    ) -> SupervisorError {
        // Anything the worker forked goes down with it
        let _ = platform::signal_group(process.handle.pgid, GroupSignal::Kill);

        let log_tail = LogStore::for_dir(source_dir)
            .tail(self.config.crash_tail_lines, self.config.log_char_cap)
            .map(|tail| tail.to_string())
            .unwrap_or_else(|e| format!("log unavailable: {e}"));
        error!(worker_id = %worker_id, pid = process.handle.pid, %exit, "worker crashed during health check");
        SupervisorError::CrashedOnStart {
            worker_id: worker_id.to_string(),
            exit,
            log_tail,
        }
    }

    /// Deregister the worker once its process ends, whoever ended it
    fn spawn_reaper(&self, worker_id: WorkerId, source_dir: PathBuf, process: WorkerProcess) {
        let live = Arc::clone(&self.live);
        tokio::spawn(async move {
            let exit = process.exited().await;
            let removed = remove_instance(&live, &worker_id, process.handle.instance_id).await;
            if removed {
                warn!(worker_id = %worker_id, pid = process.handle.pid, %exit, "worker exited on its own");
            }
            match LogStore::for_dir(&source_dir).open_sink() {
                Ok(mut sink) => {
                    let _ = sink.line(format!("process {} ended: {}", process.handle.pid, exit));
                }
                Err(e) => debug!(worker_id = %worker_id, error = %e, "could not append exit line"),
            }
        });
    }

    /// Terminate the worker's process group: SIGTERM, grace period, then SIGKILL
    pub async fn stop(&self, worker_id: &WorkerId) -> Result<StopReport> {
        let lock = self.lock_for(worker_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.stop_locked(worker_id).await
        };
        self.release_lock(worker_id, lock).await;
        result
    }

    async fn stop_locked(&self, worker_id: &WorkerId) -> Result<StopReport> {
        let process = self
            .live
            .read()
            .await
            .get(worker_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotRunning {
                worker_id: worker_id.to_string(),
            })?;
        let pgid = process.handle.pgid;
        info!(worker_id = %worker_id, pid = process.handle.pid, "stopping worker");

        if let Err(e) = platform::signal_group(pgid, GroupSignal::Terminate) {
            warn!(worker_id = %worker_id, error = %e, "failed to send SIGTERM");
        }
        let mut exit = process.wait_exit(self.config.stop_grace).await;

        let mut forced = false;
        if exit.is_none() || platform::group_alive(pgid) {
            forced = true;
            warn!(worker_id = %worker_id, pgid, "worker ignored SIGTERM; sending SIGKILL");
            if let Err(e) = platform::signal_group(pgid, GroupSignal::Kill) {
                warn!(worker_id = %worker_id, error = %e, "failed to send SIGKILL");
            }
            process.request_kill();
            if exit.is_none() {
                exit = process.wait_exit(KILL_WAIT).await;
            }
        }

        remove_instance(&self.live, worker_id, process.handle.instance_id).await;
        info!(worker_id = %worker_id, forced, exit = ?exit, "worker stopped");

        Ok(StopReport {
            worker_id: worker_id.clone(),
            forced,
            exit,
        })
    }

    /// Stop every live worker
    pub async fn shutdown(&self) -> Vec<(WorkerId, Result<StopReport>)> {
        let mut results = Vec::new();
        for worker_id in self.running_workers().await {
            let result = self.stop(&worker_id).await;
            results.push((worker_id, result));
        }
        results
    }

    pub async fn status(&self, worker_id: &WorkerId) -> WorkerStatus {
        if self.live.read().await.contains_key(worker_id) {
            WorkerStatus::Running
        } else {
            WorkerStatus::Stopped
        }
    }

    /// Ids of all live workers, sorted
    pub async fn running_workers(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.live.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn handle(&self, worker_id: &WorkerId) -> Option<ProcessHandle> {
        self.live
            .read()
            .await
            .get(worker_id)
            .map(|process| process.handle.clone())
    }

    /// Last `lines` lines of the worker log, capped at the configured size
    pub fn get_logs(&self, source_dir: &Path, lines: usize) -> Result<LogTail> {
        Ok(LogStore::for_dir(source_dir).tail(lines, self.config.log_char_cap)?)
    }
}

async fn remove_instance(live: &LiveMap, worker_id: &WorkerId, instance_id: Uuid) -> bool {
    let mut live = live.write().await;
    if live
        .get(worker_id)
        .is_some_and(|process| process.handle.instance_id == instance_id)
    {
        live.remove(worker_id);
        true
    } else {
        false
    }
}

/// `<dir>/<preferred>`, else the first `.py` file in name order
fn find_entry(source_dir: &Path, preferred: &str) -> std::io::Result<Option<PathBuf>> {
    if !source_dir.is_dir() {
        return Ok(None);
    }
    let preferred = source_dir.join(preferred);
    if preferred.is_file() {
        return Ok(Some(preferred));
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(source_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "py"))
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell_config() -> SupervisorConfig {
        SupervisorConfig::default()
            .with_python("sh")
            .with_python_args(vec![])
            .with_health_check(Duration::from_millis(300))
            .with_stop_grace(Duration::from_secs(2))
            .with_install_dependencies(false)
    }

    fn worker_dir(script: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.py"), script).unwrap();
        dir
    }

    #[test]
    fn test_find_entry() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_entry(dir.path(), "main.py").unwrap(), None);

        std::fs::write(dir.path().join("zeta.py"), "").unwrap();
        std::fs::write(dir.path().join("bot.py"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        assert_eq!(
            find_entry(dir.path(), "main.py").unwrap(),
            Some(dir.path().join("bot.py"))
        );

        std::fs::write(dir.path().join("main.py"), "").unwrap();
        assert_eq!(
            find_entry(dir.path(), "main.py").unwrap(),
            Some(dir.path().join("main.py"))
        );
    }

    #[tokio::test]
    async fn test_too_many_env_vars() {
        let dir = worker_dir("sleep 30\n");
        let supervisor = ProcessSupervisor::new(shell_config());
        let env: BTreeMap<String, String> =
            (0..6).map(|i| (format!("K{i}"), "v".to_string())).collect();

        let err = supervisor
            .start(&WorkerId::from("1"), dir.path(), "t", &env)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Configuration { .. }));
        assert!(supervisor.running_workers().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_entry_point() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(shell_config());
        let err = supervisor
            .start(&WorkerId::from("1"), dir.path(), "t", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::NoEntryPoint { .. }));
    }

    #[tokio::test]
    async fn test_stop_not_running() {
        let supervisor = ProcessSupervisor::new(shell_config());
        let err = supervisor.stop(&WorkerId::from("9")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning { .. }));
        assert!(supervisor.running_workers().await.is_empty());
        assert!(supervisor.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let dir = worker_dir("echo \"token=$BOT_TOKEN foo=$FOO\"\nexec sleep 30\n");
        let supervisor = ProcessSupervisor::new(shell_config());
        let id = WorkerId::from("7");
        let env = BTreeMap::from([("FOO".to_string(), "bar".to_string())]);

        let report = supervisor.start(&id, dir.path(), "ABC123", &env).await.unwrap();
        assert_eq!(supervisor.status(&id).await, WorkerStatus::Running);
        assert_eq!(supervisor.handle(&id).await.unwrap().pid, report.pid);

        let again = supervisor.start(&id, dir.path(), "ABC123", &env).await;
        assert!(matches!(again, Err(SupervisorError::AlreadyRunning { .. })));

        let stop = supervisor.stop(&id).await.unwrap();
        assert!(!stop.forced);
        assert_eq!(supervisor.status(&id).await, WorkerStatus::Stopped);

        let logs = supervisor.get_logs(dir.path(), 50).unwrap();
        assert!(logs.text().contains("token=ABC123 foo=bar"));
        assert!(supervisor.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_env_overrides_credential_var() {
        let dir = worker_dir("echo \"token=$BOT_TOKEN\"\nexec sleep 30\n");
        let supervisor = ProcessSupervisor::new(shell_config());
        let id = WorkerId::from("8");
        let env = BTreeMap::from([("BOT_TOKEN".to_string(), "override".to_string())]);

        supervisor.start(&id, dir.path(), "ABC123", &env).await.unwrap();
        supervisor.stop(&id).await.unwrap();

        let logs = supervisor.get_logs(dir.path(), 50).unwrap();
        assert!(logs.text().contains("token=override"));
        assert!(!logs.text().contains("token=ABC123"));
    }

    #[tokio::test]
    async fn test_crash_on_start() {
        let dir = worker_dir("echo boom >&2\nexit 4\n");
        let supervisor = ProcessSupervisor::new(shell_config());
        let id = WorkerId::from("3");

        match supervisor.start(&id, dir.path(), "t", &BTreeMap::new()).await {
            Err(SupervisorError::CrashedOnStart { exit, log_tail, .. }) => {
                assert_eq!(exit.code, Some(4));
                assert!(log_tail.contains("boom"));
            }
            other => panic!("Expected CrashedOnStart, got: {:?}", other),
        }
        assert!(supervisor.running_workers().await.is_empty());
        assert!(supervisor.locks.lock().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let dir = worker_dir("trap '' TERM\nwhile true; do sleep 1; done\n");
        let config = shell_config().with_stop_grace(Duration::from_millis(500));
        let supervisor = ProcessSupervisor::new(config);
        let id = WorkerId::from("5");

        supervisor.start(&id, dir.path(), "t", &BTreeMap::new()).await.unwrap();
        let stop = supervisor.stop(&id).await.unwrap();
        assert!(stop.forced);
        assert_eq!(supervisor.status(&id).await, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_crash_after_start_deregisters() {
        let dir = worker_dir("sleep 1\nexit 1\n");
        let supervisor = ProcessSupervisor::new(shell_config());
        let id = WorkerId::from("4");

        supervisor.start(&id, dir.path(), "t", &BTreeMap::new()).await.unwrap();
        let mut stopped = false;
        for _ in 0..50 {
            if supervisor.status(&id).await == WorkerStatus::Stopped {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(stopped);
        assert!(matches!(
            supervisor.stop(&id).await,
            Err(SupervisorError::NotRunning { .. })
        ));
    }
}
