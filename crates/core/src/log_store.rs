//! Per-worker append-only log file
//!
//! Every worker owns `<source_dir>/worker.log`. The hosting runtime writes
//! its diagnostics there before the worker process starts, then hands the
//! file over to the child as stdout/stderr. The file is never truncated;
//! readers only ever look at a capped tail.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;

/// File name of the worker log inside the source directory
pub const LOG_FILE_NAME: &str = "worker.log";

/// Character budget for log tails handed back to callers
pub const DEFAULT_LOG_CHAR_CAP: usize = 4000;

/// Prefix marking a tail that was cut to fit the character budget
pub const TRUNCATION_MARKER: &str = "...";

/// Location of one worker's log
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

/// Result of reading the end of a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTail {
    /// The log file does not exist yet
    Missing,
    /// The log file exists but holds no lines
    Empty,
    /// The requested tail, possibly truncated from the front
    Content { text: String, truncated: bool },
}

impl LogTail {
    /// Text of the tail, or an empty string for the sentinels
    pub fn text(&self) -> &str {
        match self {
            Self::Content { text, .. } => text,
            Self::Missing | Self::Empty => "",
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Content { truncated: true, .. })
    }
}

impl fmt::Display for LogTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("no logs found"),
            Self::Empty => f.write_str("log is empty"),
            Self::Content { text, .. } => f.write_str(text),
        }
    }
}

impl LogStore {
    /// Log store for the worker rooted at `source_dir`
    pub fn for_dir(source_dir: &Path) -> Self {
        Self {
            path: source_dir.join(LOG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the log for appending, creating it if needed
    pub fn open_sink(&self) -> io::Result<LogSink> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(LogSink {
            file,
            path: self.path.clone(),
        })
    }

    /// Read the last `lines` lines, capped at `char_cap` characters.
    ///
    /// When the selected lines exceed the cap, the oldest characters are
    /// dropped and the result starts with [`TRUNCATION_MARKER`]; the marker
    /// counts against the cap.
    pub fn tail(&self, lines: usize, char_cap: usize) -> io::Result<LogTail> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogTail::Missing),
            Err(e) => return Err(e),
        };
        Ok(tail_of(&String::from_utf8_lossy(&bytes), lines, char_cap))
    }
}

fn tail_of(content: &str, lines: usize, char_cap: usize) -> LogTail {
    let all: Vec<&str> = content.split_inclusive('\n').collect();
    if all.is_empty() || lines == 0 {
        return LogTail::Empty;
    }

    let text: String = all[all.len().saturating_sub(lines)..].concat();
    let total = text.chars().count();
    if total <= char_cap {
        return LogTail::Content {
            text,
            truncated: false,
        };
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    let (marker, keep) = if char_cap > marker_len {
        (TRUNCATION_MARKER, char_cap - marker_len)
    } else {
        ("", char_cap)
    };
    let kept: String = text.chars().skip(total - keep).collect();
    LogTail::Content {
        text: format!("{marker}{kept}"),
        truncated: true,
    }
}

/// Append handle owned by the runtime while it prepares a worker
#[derive(Debug)]
pub struct LogSink {
    file: File,
    path: PathBuf,
}

impl LogSink {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped diagnostic line
    pub fn line(&mut self, message: impl fmt::Display) -> io::Result<()> {
        writeln!(
            self.file,
            "[{} bothost] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )?;
        self.file.flush()
    }

    /// Stdio pair for a helper process the runtime waits on (installer).
    ///
    /// The sink stays usable; callers must not write while the helper runs.
    pub fn helper_stdio(&self) -> io::Result<(Stdio, Stdio)> {
        Ok((
            Stdio::from(self.file.try_clone()?),
            Stdio::from(self.file.try_clone()?),
        ))
    }

    /// Hand the log over to the worker process as stdout/stderr.
    ///
    /// Consumes the sink so the runtime cannot interleave writes with the
    /// child once it runs.
    pub fn into_child_stdio(self) -> io::Result<(Stdio, Stdio)> {
        let stderr = self.file.try_clone()?;
        Ok((Stdio::from(self.file), Stdio::from(stderr)))
    }
}
