use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub external: ExternalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "xtal_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Admission ceiling, in thread-weight units.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub backend: BackendKind,
}

fn default_max_concurrency() -> usize {
    num_cpus::get().max(1)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            backend: BackendKind::default(),
        }
    }
}

/// Defaults applied to every external program task unless the task overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConfig {
    /// Parent directory for per-run working directories. OS temp dir when unset.
    #[serde(default)]
    pub working_root: Option<PathBuf>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_delete_working_files")]
    pub delete_working_files: bool,

    /// Bytes of stdout/stderr tail kept for diagnostics.
    #[serde(default = "default_capture_bytes")]
    pub capture_bytes: usize,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_delete_working_files() -> bool {
    true
}

fn default_capture_bytes() -> usize {
    64 * 1024
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            working_root: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: None,
            delete_working_files: default_delete_working_files(),
            capture_bytes: default_capture_bytes(),
        }
    }
}

impl ExternalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
