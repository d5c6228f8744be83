//! Source tree dependency resolution

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ResolveError, Result};
use crate::imports::import_roots;
use crate::mapping::package_for_import;
use crate::stdlib::is_stdlib_module;

/// Directories never scanned for sources
const SKIPPED_DIRS: &[&str] = &["__pycache__", "venv", "site-packages", "node_modules"];

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Outcome of resolving one source tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Installable package names, sorted and deduplicated
    pub dependencies: Vec<String>,
    /// Files that could not be parsed, with the parser message
    pub skipped_files: Vec<(PathBuf, String)>,
}

/// Derives the external packages a Python source tree imports
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    /// Interpreter standard-library directory, when known
    stdlib_dir: Option<PathBuf>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat modules found in `dir` as standard library
    pub fn with_stdlib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stdlib_dir = Some(dir.into());
        self
    }

    /// Scan every `.py` file under `source_dir` and classify its imports.
    ///
    /// Unparseable files contribute nothing and are reported in
    /// [`Resolution::skipped_files`]; they never fail the resolution.
    pub fn resolve(&self, source_dir: &Path) -> Result<Resolution> {
        if !source_dir.is_dir() {
            return Err(ResolveError::SourceDirNotFound {
                path: source_dir.to_path_buf(),
            });
        }

        let mut local_modules = HashSet::new();
        let mut roots = BTreeSet::new();
        let mut skipped_files = Vec::new();

        let walker = WalkDir::new(source_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            if entry.file_type().is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    local_modules.insert(name.to_string());
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                local_modules.insert(stem.to_string());
            }

            match read_source(path).and_then(|source| import_roots(&source, path)) {
                Ok(scan) => roots.extend(scan.roots),
                Err(e) => {
                    warn!(path = ?path, error = %e, "could not parse source file; ignoring its imports");
                    skipped_files.push((path.to_path_buf(), e.to_string()));
                }
            }
        }

        let dependencies: BTreeSet<String> = roots
            .iter()
            .filter_map(|root| self.classify(root, &local_modules))
            .collect();

        debug!(
            source_dir = ?source_dir,
            imports = roots.len(),
            dependencies = dependencies.len(),
            skipped = skipped_files.len(),
            "dependency resolution complete"
        );

        Ok(Resolution {
            dependencies: dependencies.into_iter().collect(),
            skipped_files,
        })
    }

    /// Install name for an import root, or `None` when it needs no install.
    ///
    /// Local modules shadow everything else, the same way the script's own
    /// directory comes first on the interpreter's search path.
    fn classify(&self, root: &str, local_modules: &HashSet<String>) -> Option<String> {
        // Deliberately ahead of the mapping table, which would otherwise
        // report a local `telebot.py` as pyTelegramBotAPI.
        if local_modules.contains(root) {
            return None;
        }
        if let Some(package) = package_for_import(root) {
            return Some(package.to_string());
        }
        if is_stdlib_module(root, self.stdlib_dir.as_deref()) {
            return None;
        }
        Some(root.to_string())
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || SKIPPED_DIRS.contains(&name))
}

fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
