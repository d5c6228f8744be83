//! Worker repository trait
//!
//! Defines the interface the hosting runtime uses to read worker records and
//! write back status changes. The real store is owned by the front end.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::model::{Worker, WorkerId, WorkerStatus};
use crate::Result;

/// Repository interface for worker metadata
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// Register a new worker
    async fn create(&self, worker: Worker) -> Result<Worker>;

    /// Get a worker by ID
    async fn get_worker(&self, id: &WorkerId) -> Result<Option<Worker>>;

    /// Get all workers
    async fn list(&self) -> Result<Vec<Worker>>;

    /// Persist a status change
    async fn set_status(&self, id: &WorkerId, status: WorkerStatus) -> Result<()>;

    /// Replace the worker's environment map, returning the updated record
    async fn set_env(&self, id: &WorkerId, env: BTreeMap<String, String>) -> Result<Worker>;

    /// Delete a worker by ID
    async fn delete(&self, id: &WorkerId) -> Result<bool>;
}
