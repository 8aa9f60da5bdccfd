use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use super::{RunOutcome, RunnerPlugin, RunnerSession, RunnerStartArgs, Signal};

/// Spawns local processes with `tokio::process`.
///
/// Stdin is closed so batch programs never block on input; stdout and stderr are
/// piped for the caller to drain.
#[derive(Debug, Default)]
pub struct ProcessRunnerPlugin {}

impl ProcessRunnerPlugin {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl RunnerPlugin for ProcessRunnerPlugin {
    fn name(&self) -> &str {
        "process"
    }

    async fn start_session(&self, args: &RunnerStartArgs) -> Result<Box<dyn RunnerSession>> {
        let mut cmd = Command::new(&args.cmd);
        cmd.args(&args.args)
            .envs(&args.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &args.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", args.cmd))?;
        tracing::debug!(cmd = %args.cmd, pid = ?child.id(), "process spawned");

        Ok(Box::new(ProcessRunnerSession {
            child,
            started_at: Instant::now(),
        }))
    }
}

struct ProcessRunnerSession {
    child: Child,
    started_at: Instant,
}

#[async_trait]
impl RunnerSession for ProcessRunnerSession {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn signal(&mut self, signal: Signal) -> Result<()> {
        // Without a signal crate both map to SIGKILL / TerminateProcess.
        let res = match signal {
            Signal::Kill | Signal::Term => self.child.start_kill(),
        };
        res.context("failed to signal process")
    }

    async fn wait(&mut self) -> Result<RunOutcome> {
        let status = self.child.wait().await.context("failed to wait for process")?;
        Ok(RunOutcome {
            exit_code: status.code(),
            duration_ms: Some(self.started_at.elapsed().as_millis() as u64),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::pump;
    use crate::util::RingBytes;

    fn sh(script: &str) -> RunnerStartArgs {
        RunnerStartArgs {
            cmd: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..RunnerStartArgs::default()
        }
    }

    #[tokio::test]
    async fn reports_exit_code_and_output() {
        let plugin = ProcessRunnerPlugin::new();
        let mut session = plugin.start_session(&sh("echo out; exit 7")).await.unwrap();
        let ring = RingBytes::new(1024);
        let out = pump(session.stdout().unwrap(), ring.clone(), "stdout");

        let outcome = session.wait().await.unwrap();
        out.await.unwrap().unwrap();

        assert_eq!(outcome.exit_code, Some(7));
        assert!(!outcome.success());
        assert_eq!(ring.to_string_lossy(), "out\n");
    }

    #[tokio::test]
    async fn killed_process_has_no_exit_code() {
        let plugin = ProcessRunnerPlugin::new();
        let mut session = plugin.start_session(&sh("sleep 30")).await.unwrap();
        session.signal(Signal::Kill).await.unwrap();
        let outcome = session.wait().await.unwrap();
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn missing_executable_fails_to_start() {
        let plugin = ProcessRunnerPlugin::new();
        let args = RunnerStartArgs {
            cmd: "/definitely/not/here/xtal-missing".into(),
            ..RunnerStartArgs::default()
        };
        let err = plugin.start_session(&args).await.err().unwrap();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
