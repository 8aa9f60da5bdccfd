use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{run_guarded, Backend, CompletionGuard, Execution, WorkContext};

/// Runs work inline: the future returned by `execute` only resolves after the work
/// and its completion callback have run. Dropping that future drops the work and
/// completes the task as `Completion::Aborted`.
///
/// `cancel` just raises a flag. Work already running is not interrupted by it; the
/// flag is cleared again by the next `execute`.
#[derive(Debug, Default)]
pub struct SequentialBackend {
    cancelled: AtomicBool,
}

impl SequentialBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for SequentialBackend {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn execute(&self, execution: Execution) -> BoxFuture<'static, ()> {
        self.cancelled.store(false, Ordering::SeqCst);

        let Execution {
            work,
            on_progress,
            on_complete,
            cancel,
        } = execution;
        let ctx = WorkContext::new(on_progress, cancel);
        let guard = CompletionGuard::new(self.name(), on_complete);

        async move {
            let completion = run_guarded(work, ctx).await;
            guard.complete(completion);
        }
        .boxed()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
