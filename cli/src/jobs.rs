//! TOML job files.
//!
//! ```toml
//! max_concurrency = 4
//!
//! [[task]]
//! name = "opt water"
//! executable = "orca"
//! arguments = ["water.inp"]
//! threads = 2
//! timeout_secs = 3600
//! requirements = [{ source = "inputs/water.inp", destination = "water.inp" }]
//! outputs = [{ source = "water.out", destination = "results/water.out" }]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use xtal_core::api::{ExternalConfig, ExternalProgramTask, FileDependency};

use crate::error::JobError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default, rename = "task")]
    pub tasks: Vec<JobSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub executable: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub basename: Option<String>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub delete_working_files: Option<bool>,
    #[serde(default)]
    pub requirements: Vec<FileDependency>,
    #[serde(default)]
    pub outputs: Vec<FileDependency>,
}

impl JobSpec {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.executable.clone())
    }

    /// `timeout_secs` as a duration. `None` when unset or not representable.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Build the task. Relative requirement sources and output destinations are taken
    /// relative to `base_dir`; in-sandbox names are left alone.
    pub fn build(&self, cfg: &ExternalConfig, base_dir: &Path) -> ExternalProgramTask {
        let mut task = ExternalProgramTask::new(&self.executable)
            .with_config(cfg)
            .with_name(self.display_name())
            .with_arguments(self.arguments.iter().cloned())
            .with_environment(self.environment.clone())
            .with_requirements(self.requirements.iter().map(|dep| {
                FileDependency::new(resolve(base_dir, &dep.source), &dep.destination)
            }))
            .with_outputs(self.outputs.iter().map(|dep| {
                FileDependency::new(&dep.source, resolve(base_dir, &dep.destination))
            }));

        if let Some(basename) = &self.basename {
            task = task.with_basename(basename);
        }
        if let Some(threads) = self.threads {
            task = task.with_threads(threads);
        }
        if let Some(timeout) = self.timeout() {
            task = task.with_timeout(Some(timeout));
        }
        if let Some(overwrite) = self.overwrite {
            task = task.with_overwrite(overwrite);
        }
        if let Some(delete) = self.delete_working_files {
            task = task.with_delete_working_files(delete);
        }
        task
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Directory that relative paths in `path` are resolved against.
pub fn base_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn load(path: &Path) -> Result<JobFile, JobError> {
    let text = std::fs::read_to_string(path).map_err(|source| JobError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|e| match e {
        ParseFailure::Toml(source) => JobError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Invalid(msg) => JobError::Invalid(msg),
    })
}

enum ParseFailure {
    Toml(toml::de::Error),
    Invalid(String),
}

fn parse(text: &str) -> Result<JobFile, ParseFailure> {
    let job: JobFile = toml::from_str(text).map_err(ParseFailure::Toml)?;
    validate(&job).map_err(ParseFailure::Invalid)?;
    Ok(job)
}

fn validate(job: &JobFile) -> Result<(), String> {
    if job.tasks.is_empty() {
        return Err("no [[task]] entries".to_string());
    }
    if job.max_concurrency == Some(0) {
        return Err("max_concurrency must be at least 1".to_string());
    }
    for (idx, spec) in job.tasks.iter().enumerate() {
        let label = format!("task #{} ({})", idx + 1, spec.display_name());
        if spec.executable.trim().is_empty() {
            return Err(format!("{label}: executable is empty"));
        }
        if spec.threads == Some(0) {
            return Err(format!("{label}: threads must be at least 1"));
        }
        if let Some(secs) = spec.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(format!("{label}: timeout_secs must be a positive number"));
            }
            if spec.timeout().is_none() {
                return Err(format!("{label}: timeout_secs {secs} is too large"));
            }
        }
    }
    Ok(())
}
