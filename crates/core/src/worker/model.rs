//! Worker model definitions

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of user-defined environment variables per worker
pub const MAX_ENV_VARS: usize = 5;

/// Identifier of a hosted worker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Persisted lifecycle status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Stopped,
    Running,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hosted script project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub owner_id: Option<i64>,
    /// Directory holding the worker's sources, log and requirements file
    pub source_dir: PathBuf,
    /// Secret injected into the worker's runtime
    pub credential: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    /// Create a new stopped worker
    pub fn new(
        id: impl Into<WorkerId>,
        source_dir: impl Into<PathBuf>,
        credential: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            owner_id: None,
            source_dir: source_dir.into(),
            credential: credential.into(),
            env: BTreeMap::new(),
            status: WorkerStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the owner
    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Set (or overwrite) one environment variable.
    ///
    /// Overwriting an existing key never trips the cap.
    pub fn set_env_var(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if key.trim().is_empty() || key.contains('=') || key.contains('\0') {
            return Err(Error::InvalidInput(format!(
                "invalid environment variable name: {key:?}"
            )));
        }
        if !self.env.contains_key(&key) {
            check_env_len(self.env.len() + 1)?;
        }
        self.env.insert(key, value.into());
        Ok(())
    }

    /// Remove one environment variable, returning whether it existed
    pub fn remove_env_var(&mut self, key: &str) -> bool {
        self.env.remove(key).is_some()
    }
}

/// Validate an environment map size against [`MAX_ENV_VARS`]
pub fn check_env_len(count: usize) -> Result<()> {
    if count > MAX_ENV_VARS {
        return Err(Error::TooManyEnvVars {
            count,
            max: MAX_ENV_VARS,
        });
    }
    Ok(())
}
