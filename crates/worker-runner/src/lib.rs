//! Worker Runner - prepares and supervises hosted worker processes
//!
//! This crate turns a worker's source directory into a running process:
//! the entry file is normalized and patched, dependencies are resolved and
//! installed, and the interpreter is launched in its own process group
//! with output going to the worker log.

mod config;
mod error;
mod host;
mod platform;
mod prepare;
mod process;
mod supervisor;

pub use config::{PreparerConfig, SupervisorConfig};
pub use error::{Result, SupervisorError};
pub use host::WorkerHost;
pub use prepare::{CredentialInjection, PrepareReport, SourcePreparer};
pub use process::{ExitInfo, ProcessHandle};
pub use supervisor::{ProcessSupervisor, StartReport, StopReport};
