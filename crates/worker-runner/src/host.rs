//! Worker host - binds the supervisor to the metadata store
//!
//! The supervisor only knows about live processes. The host looks workers
//! up in a [`WorkerRepository`] and keeps their persisted status in line
//! with what actually runs.

use std::sync::Arc;

use bh_core::{LogTail, Worker, WorkerId, WorkerRepository, WorkerStatus};
use tracing::{info, warn};

use crate::error::{Result, SupervisorError};
use crate::supervisor::{ProcessSupervisor, StartReport, StopReport};

pub struct WorkerHost {
    supervisor: Arc<ProcessSupervisor>,
    repository: Arc<dyn WorkerRepository>,
}

impl WorkerHost {
    pub fn new(supervisor: Arc<ProcessSupervisor>, repository: Arc<dyn WorkerRepository>) -> Self {
        Self {
            supervisor,
            repository,
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    async fn worker(&self, id: &WorkerId) -> Result<Worker> {
        self.repository
            .get_worker(id)
            .await?
            .ok_or_else(|| SupervisorError::WorkerNotFound {
                worker_id: id.to_string(),
            })
    }

    /// Start a stored worker and mark it running
    pub async fn start_worker(&self, id: &WorkerId) -> Result<StartReport> {
        let worker = self.worker(id).await?;
        match self
            .supervisor
            .start(&worker.id, &worker.source_dir, &worker.credential, &worker.env)
            .await
        {
            Ok(report) => {
                self.repository.set_status(id, WorkerStatus::Running).await?;
                Ok(report)
            }
            Err(e @ SupervisorError::CrashedOnStart { .. }) => {
                self.repository.set_status(id, WorkerStatus::Stopped).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop a worker and mark it stopped.
    ///
    /// A worker that is not running is still marked stopped before the
    /// `NotRunning` error is returned.
    pub async fn stop_worker(&self, id: &WorkerId) -> Result<StopReport> {
        match self.supervisor.stop(id).await {
            Ok(report) => {
                self.repository.set_status(id, WorkerStatus::Stopped).await?;
                Ok(report)
            }
            Err(e @ SupervisorError::NotRunning { .. }) => {
                match self.repository.set_status(id, WorkerStatus::Stopped).await {
                    Ok(()) | Err(bh_core::Error::WorkerNotFound(_)) => {}
                    Err(store) => return Err(store.into()),
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn worker_logs(&self, id: &WorkerId, lines: usize) -> Result<LogTail> {
        let worker = self.worker(id).await?;
        self.supervisor.get_logs(&worker.source_dir, lines)
    }

    /// Rewrite persisted statuses from the live table.
    ///
    /// Returns the ids whose status changed.
    pub async fn reconcile(&self) -> Result<Vec<WorkerId>> {
        let mut changed = Vec::new();
        for worker in self.repository.list().await? {
            let live = self.supervisor.status(&worker.id).await;
            if worker.status != live {
                info!(worker_id = %worker.id, from = %worker.status, to = %live, "reconciling status");
                self.repository.set_status(&worker.id, live).await?;
                changed.push(worker.id);
            }
        }
        Ok(changed)
    }

    /// Stop the worker if needed, then delete its sources and its record
    pub async fn remove_worker(&self, id: &WorkerId) -> Result<()> {
        let worker = self.worker(id).await?;
        if self.supervisor.status(id).await == WorkerStatus::Running {
            self.supervisor.stop(id).await?;
        }

        match tokio::fs::remove_dir_all(&worker.source_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(worker_id = %id, path = ?worker.source_dir, "source directory already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.repository.delete(id).await?;
        info!(worker_id = %id, "worker removed");
        Ok(())
    }

    /// Set one environment variable on the stored worker.
    ///
    /// Takes effect on the next start.
    pub async fn set_env_var(&self, id: &WorkerId, key: &str, value: &str) -> Result<Worker> {
        let mut worker = self.worker(id).await?;
        worker.set_env_var(key, value)?;
        Ok(self.repository.set_env(id, worker.env).await?)
    }

    pub async fn remove_env_var(&self, id: &WorkerId, key: &str) -> Result<bool> {
        let mut worker = self.worker(id).await?;
        if !worker.remove_env_var(key) {
            return Ok(false);
        }
        self.repository.set_env(id, worker.env).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use bh_core::FileWorkerStore;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        host: WorkerHost,
        store: Arc<FileWorkerStore>,
        root: TempDir,
    }

    async fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let store = Arc::new(FileWorkerStore::new(root.path().join("workers.json")).await.unwrap());
        let config = SupervisorConfig::default()
            .with_python("sh")
            .with_python_args(vec![])
            .with_health_check(Duration::from_millis(300))
            .with_stop_grace(Duration::from_secs(2))
            .with_install_dependencies(false);
        let host = WorkerHost::new(
            Arc::new(ProcessSupervisor::new(config)),
            Arc::clone(&store) as Arc<dyn WorkerRepository>,
        );
        Fixture { host, store, root }
    }

    async fn add_worker(fx: &Fixture, id: &str, script: &str) -> WorkerId {
        let dir = fx.root.path().join("bots").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.py"), script).unwrap();
        fx.store.create(Worker::new(id, dir, "ABC123")).await.unwrap();
        WorkerId::from(id)
    }

    async fn stored_status(fx: &Fixture, id: &WorkerId) -> WorkerStatus {
        fx.store.get_worker(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_start_and_stop_update_status() {
        let fx = fixture().await;
        let id = add_worker(&fx, "7", "exec sleep 30\n").await;

        fx.host.start_worker(&id).await.unwrap();
        assert_eq!(stored_status(&fx, &id).await, WorkerStatus::Running);

        fx.host.stop_worker(&id).await.unwrap();
        assert_eq!(stored_status(&fx, &id).await, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_crash_marks_stopped() {
        let fx = fixture().await;
        let id = add_worker(&fx, "2", "exit 1\n").await;
        fx.store.set_status(&id, WorkerStatus::Running).await.unwrap();

        let err = fx.host.start_worker(&id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::CrashedOnStart { .. }));
        assert_eq!(stored_status(&fx, &id).await, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_not_running_reconciles() {
        let fx = fixture().await;
        let id = add_worker(&fx, "3", "exec sleep 30\n").await;
        fx.store.set_status(&id, WorkerStatus::Running).await.unwrap();

        let err = fx.host.stop_worker(&id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning { .. }));
        assert_eq!(stored_status(&fx, &id).await, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_reconcile() {
        let fx = fixture().await;
        let stale = add_worker(&fx, "1", "exec sleep 30\n").await;
        let fine = add_worker(&fx, "2", "exec sleep 30\n").await;
        fx.store.set_status(&stale, WorkerStatus::Running).await.unwrap();

        let changed = fx.host.reconcile().await.unwrap();
        assert_eq!(changed, vec![stale.clone()]);
        assert_eq!(stored_status(&fx, &stale).await, WorkerStatus::Stopped);
        assert_eq!(stored_status(&fx, &fine).await, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_env_vars_and_remove() {
        let fx = fixture().await;
        let id = add_worker(&fx, "4", "exec sleep 30\n").await;

        for i in 0..5 {
            fx.host.set_env_var(&id, &format!("K{i}"), "v").await.unwrap();
        }
        let err = fx.host.set_env_var(&id, "K5", "v").await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Store(bh_core::Error::TooManyEnvVars { .. })
        ));
        assert!(fx.host.remove_env_var(&id, "K0").await.unwrap());
        assert!(!fx.host.remove_env_var(&id, "K0").await.unwrap());

        fx.host.start_worker(&id).await.unwrap();
        let source_dir = fx.store.get_worker(&id).await.unwrap().unwrap().source_dir;
        fx.host.remove_worker(&id).await.unwrap();

        assert!(!source_dir.exists());
        assert!(fx.store.get_worker(&id).await.unwrap().is_none());
        assert_eq!(fx.host.supervisor().status(&id).await, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let fx = fixture().await;
        let err = fx.host.start_worker(&WorkerId::from("404")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::WorkerNotFound { .. }));
    }
}
