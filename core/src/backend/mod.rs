//! Execution strategies shared by every task.
//!
//! A backend holds no per-task state. The [`Manager`](crate::manager::Manager) attaches
//! the same `Arc<dyn Backend>` to each task it admits and the task hands its work to it
//! through [`TaskCore::run`](crate::task::TaskCore::run).

mod sequential;
mod threaded;

pub use sequential::SequentialBackend;
pub use threaded::ThreadedBackend;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::task::Progress;

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;
pub type WorkFn = Box<dyn FnOnce(WorkContext) -> BoxFuture<'static, ()> + Send>;
pub type CompleteFn = Box<dyn FnOnce(Completion) + Send>;

/// How a unit of work settled, as seen by the backend.
///
/// Failures are reported through the task's error slot, so a normal return is
/// `Finished` regardless of whether the task succeeded. `Aborted` means the work
/// future was dropped before it settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished,
    Panicked(String),
    Aborted,
}

/// Everything a backend needs to run one unit of work.
pub struct Execution {
    pub work: WorkFn,
    pub on_progress: ProgressFn,
    pub on_complete: CompleteFn,
    pub cancel: CancellationToken,
}

/// Handle given to running work: progress reporting plus the cancellation token.
#[derive(Clone)]
pub struct WorkContext {
    progress: ProgressFn,
    cancel: CancellationToken,
}

impl WorkContext {
    pub fn new(progress: ProgressFn, cancel: CancellationToken) -> Self {
        Self { progress, cancel }
    }

    /// A context whose progress goes nowhere.
    pub fn detached() -> Self {
        Self::new(Arc::new(|_: Progress| {}), CancellationToken::new())
    }

    pub fn report(&self, percent: u8) {
        (self.progress)(Progress::Value(percent.min(100)));
    }

    pub fn report_text(&self, text: impl Into<String>) {
        (self.progress)(Progress::Text(text.into()));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `execution.work`. `on_complete` is invoked exactly once, after the work
    /// returns or panics. The returned future resolves when the backend is done with
    /// the caller: after completion for inline backends, immediately for pooled ones.
    fn execute(&self, execution: Execution) -> BoxFuture<'static, ()>;

    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sequential,
    #[default]
    Threaded,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "threaded" => Ok(Self::Threaded),
            other => Err(anyhow::anyhow!(
                "unknown backend '{other}' (expected 'sequential' or 'threaded')"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Threaded => f.write_str("threaded"),
        }
    }
}

pub fn build_backend(kind: BackendKind) -> Arc<dyn Backend> {
    match kind {
        BackendKind::Sequential => Arc::new(SequentialBackend::new()),
        BackendKind::Threaded => Arc::new(ThreadedBackend::new()),
    }
}

/// Owns an execution's `on_complete`. Dropping the guard without calling
/// [`CompletionGuard::complete`] reports `Completion::Aborted`, so a dropped or
/// aborted execution still settles its task.
pub(crate) struct CompletionGuard {
    backend: &'static str,
    on_complete: Option<CompleteFn>,
}

impl CompletionGuard {
    pub(crate) fn new(backend: &'static str, on_complete: CompleteFn) -> Self {
        Self {
            backend,
            on_complete: Some(on_complete),
        }
    }

    pub(crate) fn complete(mut self, completion: Completion) {
        if let Completion::Panicked(msg) = &completion {
            tracing::warn!(backend = self.backend, panic = %msg, "work panicked");
        }
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(completion);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            tracing::warn!(backend = self.backend, "execution dropped before the work settled");
            on_complete(Completion::Aborted);
        }
    }
}

/// Await the work, turning a panic into `Completion::Panicked`.
pub(crate) async fn run_guarded(work: WorkFn, ctx: WorkContext) -> Completion {
    match AssertUnwindSafe(async move { work(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(()) => Completion::Finished,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(error.kind = "task.panic", error.message = %msg);
            Completion::Panicked(msg)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
