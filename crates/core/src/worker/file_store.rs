//! JSON file implementation of [`WorkerRepository`]
//!
//! The whole table is kept in memory and rewritten after every change.
//! Records are written sorted by id so the file diffs cleanly.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::model::{check_env_len, Worker, WorkerId, WorkerStatus};
use super::repository::WorkerRepository;
use crate::{Error, Result};

pub struct FileWorkerStore {
    path: PathBuf,
    workers: RwLock<HashMap<WorkerId, Worker>>,
}

impl FileWorkerStore {
    /// Load the table from `path`; a missing file is an empty table
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let workers = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<Vec<Worker>>(&content)?
                .into_iter()
                .map(|worker| (worker.id.clone(), worker))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = ?path, count = workers.len(), "worker store loaded");

        Ok(Self {
            path,
            workers: RwLock::new(workers),
        })
    }

    async fn persist(&self, workers: &HashMap<WorkerId, Worker>) -> Result<()> {
        let mut sorted: Vec<&Worker> = workers.values().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_string_pretty(&sorted)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Apply `change` to one record and persist if it reports a change.
    ///
    /// The write lock is held until the file is written, so concurrent
    /// changes cannot be persisted out of order.
    async fn modify<F>(&self, id: &WorkerId, change: F) -> Result<Worker>
    where
        F: FnOnce(&mut Worker) -> bool + Send,
    {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| Error::WorkerNotFound(id.to_string()))?;
        if !change(worker) {
            return Ok(worker.clone());
        }
        worker.updated_at = Utc::now();
        let updated = worker.clone();
        self.persist(&workers).await?;
        Ok(updated)
    }
}

#[async_trait]
impl WorkerRepository for FileWorkerStore {
    async fn create(&self, worker: Worker) -> Result<Worker> {
        check_env_len(worker.env.len())?;
        let mut workers = self.workers.write().await;
        if workers.contains_key(&worker.id) {
            return Err(Error::InvalidInput(format!(
                "worker {} is already registered",
                worker.id
            )));
        }
        workers.insert(worker.id.clone(), worker.clone());
        self.persist(&workers).await?;
        Ok(worker)
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<Worker>> {
        Ok(self.workers.read().await.get(id).cloned())
    }

    /// Oldest registration first
    async fn list(&self) -> Result<Vec<Worker>> {
        let mut workers: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(workers)
    }

    async fn set_status(&self, id: &WorkerId, status: WorkerStatus) -> Result<()> {
        self.modify(id, |worker| {
            let changed = worker.status != status;
            worker.status = status;
            changed
        })
        .await?;
        Ok(())
    }

    async fn set_env(&self, id: &WorkerId, env: BTreeMap<String, String>) -> Result<Worker> {
        check_env_len(env.len())?;
        self.modify(id, |worker| {
            let changed = worker.env != env;
            worker.env = env;
            changed
        })
        .await
    }

    async fn delete(&self, id: &WorkerId) -> Result<bool> {
        let mut workers = self.workers.write().await;
        if workers.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&workers).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_in(dir: &TempDir) -> FileWorkerStore {
        FileWorkerStore::new(dir.path().join("workers.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        assert!(store.list().await.unwrap().is_empty());
        assert!(!dir.path().join("workers.json").exists());
    }

    #[tokio::test]
    async fn test_register_twice_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        store
            .create(Worker::new("7", "bots/7", "ABC123").with_name("echo bot"))
            .await
            .unwrap();
        match store.create(Worker::new("7", "bots/7", "other")).await {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("already registered")),
            other => panic!("Expected InvalidInput, got: {:?}", other),
        }

        let stored = store.get_worker(&WorkerId::from("7")).await.unwrap().unwrap();
        assert_eq!(stored.name, "echo bot");
        assert_eq!(stored.credential, "ABC123");
    }

    #[tokio::test]
    async fn test_status_of_unknown_worker() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        match store
            .set_status(&WorkerId::from("missing"), WorkerStatus::Running)
            .await
        {
            Err(Error::WorkerNotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("Expected WorkerNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unchanged_status_keeps_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let id = WorkerId::from("1");
        let created = store.create(Worker::new("1", "bots/1", "t")).await.unwrap();

        store.set_status(&id, WorkerStatus::Stopped).await.unwrap();
        let same = store.get_worker(&id).await.unwrap().unwrap();
        assert_eq!(same.updated_at, created.updated_at);

        store.set_status(&id, WorkerStatus::Running).await.unwrap();
        let running = store.get_worker(&id).await.unwrap().unwrap();
        assert_eq!(running.status, WorkerStatus::Running);
        assert!(running.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_set_env_enforces_cap() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let id = WorkerId::from("1");
        store.create(Worker::new("1", "bots/1", "t")).await.unwrap();

        let oversized: BTreeMap<String, String> =
            (0..6).map(|i| (format!("K{i}"), "v".to_string())).collect();
        assert!(matches!(
            store.set_env(&id, oversized).await,
            Err(Error::TooManyEnvVars { count: 6, .. })
        ));

        let env = BTreeMap::from([("FOO".to_string(), "bar".to_string())]);
        let updated = store.set_env(&id, env.clone()).await.unwrap();
        assert_eq!(updated.env, env);
    }

    #[tokio::test]
    async fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let id = WorkerId::from("7");
        {
            let store = store_in(&dir).await;
            store.create(Worker::new("7", "bots/7", "ABC123")).await.unwrap();
            store.create(Worker::new("8", "bots/8", "t")).await.unwrap();
            store
                .set_env(&id, BTreeMap::from([("FOO".to_string(), "bar".to_string())]))
                .await
                .unwrap();
            store.set_status(&id, WorkerStatus::Running).await.unwrap();
            assert!(store.delete(&WorkerId::from("8")).await.unwrap());
            assert!(!store.delete(&WorkerId::from("8")).await.unwrap());
        }

        let store = store_in(&dir).await;
        let workers = store.list().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].id, id);
        assert_eq!(workers[0].env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(workers[0].status, WorkerStatus::Running);
    }
}
