//! Dependency resolution for hosted workers
//!
//! This crate derives the external packages a Python source tree needs,
//! keeps the worker's `requirements.txt` up to date, and drives `pip` to
//! install them.

mod error;
mod imports;
mod installer;
mod mapping;
mod requirements;
mod resolver;
mod stdlib;

pub use error::{ResolveError, Result};
pub use imports::{import_roots, ImportScan};
pub use installer::{discover_stdlib_dir, InstallOutcome, Installer, DEFAULT_INSTALL_TIMEOUT};
pub use mapping::package_for_import;
pub use requirements::{
    declared_names, merge_requirements, requirement_name, REQUIREMENTS_FILE_NAME,
};
pub use resolver::{DependencyResolver, Resolution};
pub use stdlib::is_stdlib_module;
