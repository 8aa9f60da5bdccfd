use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use super::dependency::FileDependency;
use crate::backend::WorkContext;
use crate::config::ExternalConfig;
use crate::error::{ProgramError, RunnerError};
use crate::runner::{
    pump, ProcessRunnerPlugin, RunOutcome, RunnerPlugin, RunnerStartArgs, Signal,
};
use crate::task::{Task, TaskCore};
use crate::util::{lock, RingBytes};

/// How long to keep reading stdout/stderr after the process is gone. A grandchild
/// holding the pipes open would otherwise stall the task.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Launch configuration of an [`ExternalProgramTask`].
#[derive(Debug, Clone)]
pub struct ProgramSettings {
    pub executable: String,
    pub arguments: Vec<String>,
    pub environment: HashMap<String, String>,
    pub requirements: Vec<FileDependency>,
    pub outputs: Vec<FileDependency>,
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub delete_working_files: bool,
    pub working_root: Option<PathBuf>,
    pub capture_bytes: usize,
}

impl ProgramSettings {
    fn new(executable: String, cfg: &ExternalConfig) -> Self {
        Self {
            executable,
            arguments: Vec::new(),
            environment: HashMap::new(),
            requirements: Vec::new(),
            outputs: Vec::new(),
            timeout: cfg.timeout(),
            poll_interval: cfg.poll_interval(),
            delete_working_files: cfg.delete_working_files,
            working_root: cfg.working_root.clone(),
            capture_bytes: cfg.capture_bytes,
        }
    }
}

#[derive(Debug, Default)]
struct RunReport {
    exit_code: Option<i32>,
    working_directory: Option<PathBuf>,
}

enum Settled {
    Exited(anyhow::Result<RunOutcome>),
    Cancelled,
    TimedOut(Duration),
}

/// Runs an external executable in an isolated working directory.
///
/// A run goes through staging, launch, monitoring, result collection and teardown.
/// Any failure lands in the task's error slot as the `Display` form of a
/// [`ProgramError`].
pub struct ExternalProgramTask {
    core: TaskCore,
    settings: ProgramSettings,
    runner: Arc<dyn RunnerPlugin>,
    report: Mutex<RunReport>,
}

impl ExternalProgramTask {
    pub fn new(executable: impl Into<String>) -> Self {
        let settings = ProgramSettings::new(executable.into(), &ExternalConfig::default());
        let core = TaskCore::with_name(program_name_of(&settings.executable));
        Self {
            core,
            settings,
            runner: Arc::new(ProcessRunnerPlugin::new()),
            report: Mutex::new(RunReport::default()),
        }
    }

    /// Apply process-wide defaults. Call before the per-task overrides.
    pub fn with_config(mut self, cfg: &ExternalConfig) -> Self {
        let executable = std::mem::take(&mut self.settings.executable);
        let previous = std::mem::replace(&mut self.settings, ProgramSettings::new(executable, cfg));
        self.settings.arguments = previous.arguments;
        self.settings.environment = previous.environment;
        self.settings.requirements = previous.requirements;
        self.settings.outputs = previous.outputs;
        self
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.core.set_name(name);
        self
    }

    pub fn with_basename(self, basename: impl Into<String>) -> Self {
        self.core.set_basename(basename);
        self
    }

    pub fn with_threads(self, threads: usize) -> Self {
        self.core.set_threads(threads);
        self
    }

    pub fn with_overwrite(self, overwrite: bool) -> Self {
        self.core.set_overwrite(overwrite);
        self
    }

    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        self.settings.arguments.push(arg.into());
        self
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_environment(mut self, env: HashMap<String, String>) -> Self {
        self.settings.environment.extend(env);
        self
    }

    pub fn with_requirement(mut self, dep: FileDependency) -> Self {
        self.settings.requirements.push(dep);
        self
    }

    pub fn with_requirements(mut self, deps: impl IntoIterator<Item = FileDependency>) -> Self {
        self.settings.requirements.extend(deps);
        self
    }

    pub fn with_output(mut self, dep: FileDependency) -> Self {
        self.settings.outputs.push(dep);
        self
    }

    pub fn with_outputs(mut self, deps: impl IntoIterator<Item = FileDependency>) -> Self {
        self.settings.outputs.extend(deps);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_delete_working_files(mut self, delete: bool) -> Self {
        self.settings.delete_working_files = delete;
        self
    }

    pub fn with_working_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.settings.working_root = Some(root.into());
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn RunnerPlugin>) -> Self {
        self.runner = runner;
        self
    }

    pub fn settings(&self) -> &ProgramSettings {
        &self.settings
    }

    /// Exit code of the last run. `None` before a run, after a crash, or when the
    /// process never launched or was killed.
    pub fn exit_code(&self) -> Option<i32> {
        lock(&self.report).exit_code
    }

    /// Working directory kept after a run with `delete_working_files` disabled.
    pub fn working_directory(&self) -> Option<PathBuf> {
        lock(&self.report).working_directory.clone()
    }

    pub fn program_name(&self) -> String {
        program_name_of(&self.settings.executable)
    }

    async fn execute(&self, ctx: &WorkContext) -> Result<(), ProgramError> {
        let workdir = self.create_working_directory()?;
        tracing::debug!(task = %self.core.name(), dir = %workdir.path().display(), "working directory created");

        let result = self.run_in(workdir.path(), ctx).await;
        self.teardown(workdir);
        result
    }

    fn create_working_directory(&self) -> Result<TempDir, ProgramError> {
        let prefix = format!("{}-", self.core.basename().unwrap_or_else(|| "xtal".into()));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match &self.settings.working_root {
            Some(root) => std::fs::create_dir_all(root).and_then(|()| builder.tempdir_in(root)),
            None => builder.tempdir(),
        };
        dir.map_err(|error| ProgramError::WorkingDirectory { error })
    }

    async fn run_in(&self, dir: &Path, ctx: &WorkContext) -> Result<(), ProgramError> {
        let program = self.program_name();
        let overwrite = self.core.overwrite();

        for dep in &self.settings.requirements {
            dep.stage_into(dir, overwrite).await?;
        }
        if ctx.is_cancelled() {
            return Err(ProgramError::Cancelled { program });
        }

        let (outcome, stdout, stderr) = self.launch_and_monitor(dir, ctx, &program).await?;
        lock(&self.report).exit_code = outcome.exit_code;
        tracing::info!(
            task = %self.core.name(),
            exit_code = ?outcome.exit_code,
            duration_ms = ?outcome.duration_ms,
            "program exited"
        );

        match outcome.exit_code {
            Some(0) => self.collect_outputs(dir, overwrite).await,
            Some(code) => Err(ProgramError::NonzeroExit {
                program,
                code,
                stdout,
                stderr,
            }),
            None => Err(ProgramError::Crashed { program, stderr }),
        }
    }

    async fn launch_and_monitor(
        &self,
        dir: &Path,
        ctx: &WorkContext,
        program: &str,
    ) -> Result<(RunOutcome, String, String), ProgramError> {
        let args = RunnerStartArgs {
            cmd: self.settings.executable.clone(),
            args: self.settings.arguments.clone(),
            envs: self.settings.environment.clone(),
            working_dir: Some(dir.to_path_buf()),
        };
        let mut session =
            self.runner
                .start_session(&args)
                .await
                .map_err(|e| ProgramError::Launch {
                    program: program.to_string(),
                    message: format!("{e:#}"),
                })?;
        tracing::debug!(task = %self.core.name(), pid = ?session.id(), runner = self.runner.name(), "program launched");

        let ring_out = RingBytes::new(self.settings.capture_bytes);
        let ring_err = RingBytes::new(self.settings.capture_bytes);
        let out_task = session.stdout().map(|rd| pump(rd, ring_out.clone(), "stdout"));
        let err_task = session.stderr().map(|rd| pump(rd, ring_err.clone(), "stderr"));

        let started = Instant::now();
        let deadline = self.settings.timeout.and_then(|t| {
            let at = tokio::time::Instant::now().checked_add(t);
            if at.is_none() {
                tracing::debug!(task = %self.core.name(), timeout = ?t, "timeout out of range; running without a deadline");
            }
            at.map(|at| (at, t))
        });
        let mut tick = tokio::time::interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let settled = {
            let wait_fut = session.wait();
            tokio::pin!(wait_fut);

            loop {
                tokio::select! {
                    biased;

                    res = &mut wait_fut => break Settled::Exited(res),

                    _ = ctx.cancelled() => break Settled::Cancelled,

                    timeout = until(deadline) => break Settled::TimedOut(timeout),

                    _ = tick.tick() => {
                        let secs = started.elapsed().as_secs();
                        tracing::trace!(task = %self.core.name(), secs, "program still running");
                        ctx.report_text(format!("{program}: running for {secs}s"));
                    }
                }
            }
        };

        let outcome = match settled {
            Settled::Exited(Ok(outcome)) => outcome,
            Settled::Exited(Err(e)) => {
                return Err(ProgramError::Launch {
                    program: program.to_string(),
                    message: format!("{e:#}"),
                })
            }
            interrupted => {
                if let Err(e) = session.signal(Signal::Kill).await {
                    tracing::warn!(task = %self.core.name(), error = %e, "failed to kill program");
                }
                // Reap so no zombie outlives the task.
                let _ = session.wait().await;
                drain(out_task).await;
                drain(err_task).await;

                return Err(match interrupted {
                    Settled::TimedOut(timeout) => {
                        tracing::warn!(task = %self.core.name(), timeout_ms = timeout.as_millis() as u64, "program timed out");
                        ProgramError::Timeout {
                            program: program.to_string(),
                            timeout,
                        }
                    }
                    _ => {
                        tracing::info!(task = %self.core.name(), "program cancelled");
                        ProgramError::Cancelled {
                            program: program.to_string(),
                        }
                    }
                });
            }
        };

        drain(out_task).await;
        drain(err_task).await;
        Ok((outcome, ring_out.to_string_lossy(), ring_err.to_string_lossy()))
    }

    async fn collect_outputs(&self, dir: &Path, overwrite: bool) -> Result<(), ProgramError> {
        for dep in &self.settings.outputs {
            dep.collect_from(dir, overwrite).await?;
        }
        for dep in &self.settings.outputs {
            if !tokio::fs::try_exists(&dep.destination).await.unwrap_or(false) {
                return Err(ProgramError::MissingOutput(dep.destination.clone()));
            }
        }
        Ok(())
    }

    fn teardown(&self, dir: TempDir) {
        if self.settings.delete_working_files {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(dir = %path.display(), error = %e, "failed to remove working directory");
            }
        } else {
            let kept = dir.into_path();
            tracing::info!(task = %self.core.name(), dir = %kept.display(), "keeping working directory");
            lock(&self.report).working_directory = Some(kept);
        }
    }
}

impl Task for ExternalProgramTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start(self: Arc<Self>) -> BoxFuture<'static, ()> {
        let this = self.clone();
        self.core.run(move |ctx| {
            async move {
                if let Err(err) = this.execute(&ctx).await {
                    tracing::warn!(
                        task = %this.core.name(),
                        kind = ?err.kind(),
                        error = %err,
                        "external program failed"
                    );
                    this.core.set_error_message(err.to_string());
                }
            }
            .boxed()
        })
    }
}

impl fmt::Debug for ExternalProgramTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalProgramTask")
            .field("core", &self.core)
            .field("settings", &self.settings)
            .field("runner", &self.runner.name())
            .finish()
    }
}

fn program_name_of(executable: &str) -> String {
    Path::new(executable)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string())
}

async fn until(deadline: Option<(tokio::time::Instant, Duration)>) -> Duration {
    match deadline {
        Some((at, timeout)) => {
            tokio::time::sleep_until(at).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

async fn drain(task: Option<JoinHandle<Result<u64, RunnerError>>>) {
    let Some(mut task) = task else {
        return;
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "output capture failed"),
        Ok(_) => {}
        Err(_) => {
            task.abort();
            tracing::debug!("output stream still open after exit; capture truncated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_defaults_to_executable_file_name() {
        let task = ExternalProgramTask::new("/opt/orca/orca");
        assert_eq!(task.program_name(), "orca");
        assert_eq!(task.core().name(), "orca");
    }

    #[test]
    fn config_defaults_keep_per_task_fields() {
        let cfg = ExternalConfig {
            timeout_ms: Some(1500),
            delete_working_files: false,
            ..ExternalConfig::default()
        };
        let task = ExternalProgramTask::new("xtb")
            .with_argument("--opt")
            .with_requirement(FileDependency::input("/data/mol.xyz"))
            .with_config(&cfg);

        let s = task.settings();
        assert_eq!(s.executable, "xtb");
        assert_eq!(s.arguments, vec!["--opt".to_string()]);
        assert_eq!(s.requirements.len(), 1);
        assert_eq!(s.timeout, Some(Duration::from_millis(1500)));
        assert!(!s.delete_working_files);
    }

    #[test]
    fn working_directory_uses_basename_prefix() {
        let root = tempfile::tempdir().unwrap();
        let task = ExternalProgramTask::new("gulp")
            .with_basename("quartz")
            .with_working_root(root.path().join("runs"));

        let dir = task.create_working_directory().unwrap();
        let name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("quartz-"), "{name}");
        assert!(dir.path().starts_with(root.path().join("runs")));
    }
}
