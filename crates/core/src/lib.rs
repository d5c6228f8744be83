//! Core library for bothost
//!
//! This crate contains the pieces shared by the hosting runtime:
//! - Worker records and the metadata store interface
//! - The per-worker append-only log store

pub mod error;
pub mod log_store;
pub mod worker;

pub use error::Error;
pub use log_store::{LogSink, LogStore, LogTail, DEFAULT_LOG_CHAR_CAP, LOG_FILE_NAME};
pub use worker::{
    check_env_len, FileWorkerStore, Worker, WorkerId, WorkerRepository, WorkerStatus, MAX_ENV_VARS,
};

pub type Result<T> = std::result::Result<T, Error>;
