use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::{run_guarded, Backend, CompletionGuard, Execution, WorkContext};
use crate::util::lock;

/// Runs work on the tokio worker pool and returns immediately.
///
/// Must be used from within a multi-threaded tokio runtime. `on_complete` fires on a
/// pool thread once the work settles. `cancel` cancels the token handed to the most
/// recent `execute`; the work decides where it observes it.
#[derive(Debug, Default)]
pub struct ThreadedBackend {
    current: Mutex<Option<CancellationToken>>,
}

impl ThreadedBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for ThreadedBackend {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn execute(&self, execution: Execution) -> BoxFuture<'static, ()> {
        let Execution {
            work,
            on_progress,
            on_complete,
            cancel,
        } = execution;
        *lock(&self.current) = Some(cancel.clone());
        let ctx = WorkContext::new(on_progress, cancel);
        let guard = CompletionGuard::new(self.name(), on_complete);

        tokio::spawn(async move {
            let completion = run_guarded(work, ctx).await;
            guard.complete(completion);
        });

        futures::future::ready(()).boxed()
    }

    fn cancel(&self) {
        if let Some(token) = lock(&self.current).as_ref() {
            token.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }
}
