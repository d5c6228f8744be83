//! Declared-dependencies file (`requirements.txt`) handling
//!
//! The file only ever grows: new entries are appended, existing lines are
//! never rewritten.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

/// File name of the declared-dependencies file inside a worker directory
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";

/// Package name of a requirement line.
///
/// Strips version pins, extras, environment markers and trailing comments.
/// Returns `None` for blank lines, comments and pip options (`-r`, `--index-url`).
pub fn requirement_name(line: &str) -> Option<&str> {
    let line = match line.find(" #") {
        Some(idx) => &line[..idx],
        None => line,
    }
    .trim();

    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return None;
    }

    let end = line
        .find(|c: char| "=<>!~[;@ \t(".contains(c))
        .unwrap_or(line.len());
    let name = line[..end].trim();
    (!name.is_empty()).then_some(name)
}

/// Normalized form used to compare package names
fn normalize(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

/// Normalized names already declared in `path` (empty when the file is absent)
pub fn declared_names(path: &Path) -> io::Result<HashSet<String>> {
    let content = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };
    Ok(content
        .lines()
        .filter_map(requirement_name)
        .map(normalize)
        .collect())
}

/// Append the entries whose package is not declared yet.
///
/// Names are compared case-insensitively and ignoring version pins. The
/// file is created when missing. Returns the entries actually appended.
pub fn merge_requirements(path: &Path, entries: &[String]) -> io::Result<Vec<String>> {
    let mut declared = declared_names(path)?;
    let mut appended = Vec::new();

    for entry in entries {
        let Some(name) = requirement_name(entry) else {
            continue;
        };
        if declared.insert(normalize(name)) {
            appended.push(entry.trim().to_string());
        }
    }

    if appended.is_empty() {
        return Ok(appended);
    }

    let needs_newline = match std::fs::read(path) {
        Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    for entry in &appended {
        writeln!(file, "{entry}")?;
    }
    file.flush()?;

    debug!(path = ?path, added = ?appended, "requirements merged");
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_requirement_name() {
        assert_eq!(requirement_name("requests==2.31.0"), Some("requests"));
        assert_eq!(requirement_name("  aiogram>=3.0 "), Some("aiogram"));
        assert_eq!(requirement_name("uvicorn[standard]~=0.29"), Some("uvicorn"));
        assert_eq!(requirement_name("pywin32; sys_platform == 'win32'"), Some("pywin32"));
        assert_eq!(requirement_name("flask # web"), Some("flask"));
        assert_eq!(requirement_name("# comment"), None);
        assert_eq!(requirement_name("-r base.txt"), None);
        assert_eq!(requirement_name("   "), None);
    }

    #[test]
    fn test_merge_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REQUIREMENTS_FILE_NAME);

        let added = merge_requirements(&path, &strings(&["requests", "pyTelegramBotAPI"])).unwrap();
        assert_eq!(added, strings(&["requests", "pyTelegramBotAPI"]));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "requests\npyTelegramBotAPI\n"
        );
    }

    #[test]
    fn test_merge_skips_declared_ignoring_pin_and_case() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REQUIREMENTS_FILE_NAME);
        std::fs::write(&path, "Requests==2.31.0\npython_dotenv>=1.0").unwrap();

        let added =
            merge_requirements(&path, &strings(&["requests", "python-dotenv", "aiogram"])).unwrap();
        assert_eq!(added, strings(&["aiogram"]));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Requests==2.31.0\npython_dotenv>=1.0\naiogram\n"
        );
    }

    #[test]
    fn test_merge_only_grows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REQUIREMENTS_FILE_NAME);
        std::fs::write(&path, "# pinned by hand\nflask==3.0.0\n").unwrap();

        let before = std::fs::read_to_string(&path).unwrap();
        merge_requirements(&path, &strings(&["flask", "redis"])).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();

        assert!(after.starts_with(&before));
        assert_eq!(after, "# pinned by hand\nflask==3.0.0\nredis\n");

        // Nothing new: file untouched
        assert!(merge_requirements(&path, &strings(&["redis", "FLASK"])).unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), after);
    }

    #[test]
    fn test_merge_dedups_within_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REQUIREMENTS_FILE_NAME);

        let added = merge_requirements(&path, &strings(&["aiogram==3.4.1", "aiogram"])).unwrap();
        assert_eq!(added, strings(&["aiogram==3.4.1"]));
    }
}
