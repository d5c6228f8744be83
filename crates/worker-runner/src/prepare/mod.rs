//! Entry file preparation
//!
//! Before every start the worker's entry file is rewritten in place:
//! decoded and re-saved as UTF-8 with an explicit coding header, pasted
//! requirement pins moved into `requirements.txt`, and the credential
//! constant pointed at the worker's credential. Running the preparer twice
//! leaves the file byte-identical.

mod credential;
mod encoding;
mod requirements;

use std::path::{Path, PathBuf};

use dep_resolver::{merge_requirements, REQUIREMENTS_FILE_NAME};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PreparerConfig;
use crate::error::Result;

pub use credential::CredentialInjection;

use credential::inject_credential;
use encoding::{decode_source, drop_leading_declarations, take_preamble, CODING_HEADER};
use requirements::strip_requirement_lines;

/// Substituted for an entry file no candidate encoding can decode
const PLACEHOLDER_SOURCE: &str = r#"import time

TOKEN = ""

if __name__ == "__main__":
    print("worker source could not be decoded; running placeholder", flush=True)
    while True:
        time.sleep(3600)
"#;

/// What the preparer did to one entry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrepareReport {
    pub entry: PathBuf,
    /// Name of the encoding the file was read with
    pub encoding: String,
    pub bom_stripped: bool,
    /// The file was undecodable and replaced with a placeholder
    pub fallback_stub: bool,
    /// Requirement lines removed from the source
    pub stripped_requirements: Vec<String>,
    /// Requirement lines newly added to `requirements.txt`
    pub merged_requirements: Vec<String>,
    pub credential: CredentialInjection,
    /// Whether the file contents changed on disk
    pub rewritten: bool,
}

impl PrepareReport {
    /// Human-readable notes about anything that did not go to plan
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.fallback_stub {
            warnings.push(format!(
                "{} could not be decoded; replaced with a placeholder",
                self.entry.display()
            ));
        }
        if self.credential == CredentialInjection::NotFound {
            warnings.push(format!(
                "credential not injected into {}: {}",
                self.entry.display(),
                self.credential
            ));
        }
        warnings
    }
}

/// Rewrites entry files so they can be started by the supervisor
#[derive(Debug, Clone, Default)]
pub struct SourcePreparer {
    config: PreparerConfig,
}

impl SourcePreparer {
    pub fn new(config: PreparerConfig) -> Self {
        Self { config }
    }

    /// Prepare `entry` for a run with `credential`.
    ///
    /// Stripped requirement pins are merged into the `requirements.txt`
    /// next to the entry file.
    pub fn prepare(&self, entry: &Path, credential: &str) -> Result<PrepareReport> {
        let original = std::fs::read(entry)?;

        let (text, encoding, bom_stripped, fallback_stub) =
            match decode_source(&original, &self.config.encodings) {
                Some(decoded) => (
                    decoded.text,
                    decoded.encoding.name().to_string(),
                    decoded.bom_stripped,
                    false,
                ),
                None => {
                    warn!(entry = ?entry, "entry file matches no candidate encoding; using placeholder");
                    (PLACEHOLDER_SOURCE.to_string(), "none".to_string(), false, true)
                }
            };

        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let shebang = take_preamble(&mut lines);

        let stripped_requirements = strip_requirement_lines(&mut lines);
        drop_leading_declarations(&mut lines);
        let merged_requirements = if stripped_requirements.is_empty() {
            Vec::new()
        } else {
            let requirements = entry
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(REQUIREMENTS_FILE_NAME);
            merge_requirements(&requirements, &stripped_requirements)?
        };

        let credential = inject_credential(
            &mut lines,
            credential,
            &self.config.credential_names,
            &self.config.client_modules,
        );
        if credential == CredentialInjection::NotFound {
            warn!(entry = ?entry, "no credential constant or client import found");
        }

        let mut output: Vec<String> = Vec::with_capacity(lines.len() + 2);
        output.extend(shebang);
        output.push(CODING_HEADER.to_string());
        output.extend(lines);
        let prepared = output.join("\n");

        let rewritten = prepared.as_bytes() != original.as_slice();
        if rewritten {
            std::fs::write(entry, prepared.as_bytes())?;
            info!(entry = ?entry, encoding = %encoding, "entry file rewritten");
        } else {
            debug!(entry = ?entry, "entry file already prepared");
        }

        Ok(PrepareReport {
            entry: entry.to_path_buf(),
            encoding,
            bom_stripped,
            fallback_stub,
            stripped_requirements,
            merged_requirements,
            credential,
            rewritten,
        })
    }
}
