//! Application state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bh_core::{FileWorkerStore, WorkerRepository};
use worker_runner::{ProcessSupervisor, SupervisorConfig, WorkerHost};

/// Shared application state
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<FileWorkerStore>,
    host: WorkerHost,
    workers_root: PathBuf,
}

impl AppState {
    /// Open the worker store under `data_dir` and build the host around it
    pub async fn new(
        data_dir: &Path,
        workers_root: PathBuf,
        config: SupervisorConfig,
    ) -> bh_core::Result<Self> {
        let store = Arc::new(FileWorkerStore::new(data_dir.join("workers.json")).await?);
        let host = WorkerHost::new(
            Arc::new(ProcessSupervisor::new(config)),
            Arc::clone(&store) as Arc<dyn WorkerRepository>,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                store,
                host,
                workers_root,
            }),
        })
    }

    pub fn store(&self) -> &FileWorkerStore {
        &self.inner.store
    }

    pub fn host(&self) -> &WorkerHost {
        &self.inner.host
    }

    pub fn workers_root(&self) -> &Path {
        &self.inner.workers_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::Worker;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_reopens_store() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        let workers_root = dir.path().join("bots");

        let state = AppState::new(&data_dir, workers_root.clone(), SupervisorConfig::default())
            .await
            .unwrap();
        assert_eq!(state.workers_root(), workers_root.as_path());
        state
            .store()
            .create(Worker::new("3", workers_root.join("3"), "t"))
            .await
            .unwrap();

        let reopened = AppState::new(&data_dir, workers_root, SupervisorConfig::default())
            .await
            .unwrap();
        let workers = reopened.store().list().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].id.as_str(), "3");
    }
}
