//! Worker module
//!
//! Worker records and the metadata store they live in.

mod file_store;
mod model;
mod repository;

pub use file_store::FileWorkerStore;
pub use model::*;
pub use repository::WorkerRepository;
