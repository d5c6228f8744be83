//! Runtime configuration for the supervisor and the source preparer

use std::path::PathBuf;
use std::time::Duration;

use bh_core::DEFAULT_LOG_CHAR_CAP;
use dep_resolver::DEFAULT_INSTALL_TIMEOUT;
use encoding_rs::{Encoding, GBK, SHIFT_JIS, UTF_8, WINDOWS_1251, WINDOWS_1252};

pub const ENV_PYTHON: &str = "BOTHOST_PYTHON";
pub const ENV_HEALTH_CHECK_SECS: &str = "BOTHOST_HEALTH_CHECK_SECS";
pub const ENV_STOP_GRACE_SECS: &str = "BOTHOST_STOP_GRACE_SECS";
pub const ENV_INSTALL_DEPS: &str = "BOTHOST_INSTALL_DEPS";

/// Settings for the text rewrites applied to a worker's entry file
#[derive(Debug, Clone)]
pub struct PreparerConfig {
    /// Constant names that hold the chat credential in user code
    pub credential_names: Vec<String>,
    /// Client library modules after whose import a credential line may be inserted
    pub client_modules: Vec<String>,
    /// Decodings tried in order when normalizing the entry file
    pub encodings: Vec<&'static Encoding>,
}

impl Default for PreparerConfig {
    fn default() -> Self {
        Self {
            credential_names: vec![
                "TOKEN".to_string(),
                "BOT_TOKEN".to_string(),
                "API_TOKEN".to_string(),
            ],
            client_modules: vec!["telebot".to_string()],
            encodings: vec![UTF_8, WINDOWS_1251, WINDOWS_1252, GBK, SHIFT_JIS],
        }
    }
}

impl PreparerConfig {
    pub fn with_encodings(mut self, encodings: Vec<&'static Encoding>) -> Self {
        self.encodings = encodings;
        self
    }

    pub fn with_credential_names(mut self, names: Vec<String>) -> Self {
        self.credential_names = names;
        self
    }

    pub fn with_client_modules(mut self, modules: Vec<String>) -> Self {
        self.client_modules = modules;
        self
    }
}

/// Configuration for [`ProcessSupervisor`](crate::ProcessSupervisor)
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interpreter used for workers, installs and the stdlib query
    pub python: PathBuf,
    /// Arguments placed before the entry file
    pub python_args: Vec<String>,
    /// How long a fresh process must survive before start() succeeds
    pub health_check: Duration,
    /// Wait between SIGTERM and SIGKILL on stop()
    pub stop_grace: Duration,
    pub install_timeout: Duration,
    pub install_dependencies: bool,
    /// Environment variable carrying the credential into the child
    pub credential_env_var: String,
    pub log_char_cap: usize,
    /// Log lines attached to a crash-on-start error
    pub crash_tail_lines: usize,
    /// Preferred entry file name inside a source directory
    pub entry_file: String,
    pub preparer: PreparerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            python_args: vec!["-u".to_string()],
            health_check: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            install_dependencies: true,
            credential_env_var: "BOT_TOKEN".to_string(),
            log_char_cap: DEFAULT_LOG_CHAR_CAP,
            crash_tail_lines: 20,
            entry_file: "main.py".to_string(),
            preparer: PreparerConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults overridden by `BOTHOST_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `BOTHOST_*` names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            python: lookup(ENV_PYTHON)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.python),
            health_check: secs(lookup(ENV_HEALTH_CHECK_SECS), defaults.health_check),
            stop_grace: secs(lookup(ENV_STOP_GRACE_SECS), defaults.stop_grace),
            install_dependencies: flag(lookup(ENV_INSTALL_DEPS), defaults.install_dependencies),
            ..defaults
        }
    }

    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_python_args(mut self, args: Vec<String>) -> Self {
        self.python_args = args;
        self
    }

    pub fn with_health_check(mut self, window: Duration) -> Self {
        self.health_check = window;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_install_dependencies(mut self, enabled: bool) -> Self {
        self.install_dependencies = enabled;
        self
    }

    pub fn with_preparer(mut self, preparer: PreparerConfig) -> Self {
        self.preparer = preparer;
        self
    }
}

fn flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

fn secs(raw: Option<String>, default: Duration) -> Duration {
    raw.and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.python, PathBuf::from("python3"));
        assert_eq!(config.python_args, vec!["-u"]);
        assert_eq!(config.health_check, Duration::from_secs(5));
        assert_eq!(config.install_timeout, Duration::from_secs(180));
        assert_eq!(config.credential_env_var, "BOT_TOKEN");
        assert_eq!(config.log_char_cap, 4000);
        assert!(config.install_dependencies);
    }

    #[test]
    fn test_env_overrides() {
        let config = SupervisorConfig::from_lookup(lookup(&[
            (ENV_PYTHON, "/opt/py/bin/python3.12"),
            (ENV_HEALTH_CHECK_SECS, "0.5"),
            (ENV_STOP_GRACE_SECS, "2"),
            (ENV_INSTALL_DEPS, "off"),
        ]));
        assert_eq!(config.python, PathBuf::from("/opt/py/bin/python3.12"));
        assert_eq!(config.health_check, Duration::from_millis(500));
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert!(!config.install_dependencies);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = SupervisorConfig::from_lookup(lookup(&[
            (ENV_PYTHON, "  "),
            (ENV_HEALTH_CHECK_SECS, "soon"),
            (ENV_STOP_GRACE_SECS, "-1"),
            (ENV_INSTALL_DEPS, "maybe"),
        ]));
        let defaults = SupervisorConfig::default();
        assert_eq!(config.python, defaults.python);
        assert_eq!(config.health_check, defaults.health_check);
        assert_eq!(config.stop_grace, defaults.stop_grace);
        assert!(config.install_dependencies);
    }

    #[test]
    fn test_preparer_defaults() {
        let config = PreparerConfig::default();
        assert_eq!(config.credential_names, vec!["TOKEN", "BOT_TOKEN", "API_TOKEN"]);
        assert_eq!(config.encodings.first(), Some(&UTF_8));
    }
}
