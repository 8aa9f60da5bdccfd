use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{Task, TaskCore};
use crate::backend::WorkContext;
use crate::util::lock;

type BoxedWork =
    Box<dyn FnOnce(TaskCore, WorkContext) -> BoxFuture<'static, Result<(), String>> + Send>;

/// A task whose work is an async closure.
///
/// Returning `Err(message)` records `message` as the task's error.
pub struct FnTask {
    core: TaskCore,
    work: Mutex<Option<BoxedWork>>,
}

impl FnTask {
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(TaskCore, WorkContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            core: TaskCore::with_name(name),
            work: Mutex::new(Some(Box::new(move |core, ctx| work(core, ctx).boxed()))),
        }
    }

    pub fn with_threads(self, threads: usize) -> Self {
        self.core.set_threads(threads);
        self
    }
}

impl Task for FnTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start(self: Arc<Self>) -> BoxFuture<'static, ()> {
        let Some(work) = lock(&self.work).take() else {
            tracing::warn!(task = %self.core.name(), "work already consumed");
            return futures::future::ready(()).boxed();
        };
        let core = self.core.clone();
        self.core.run(move |ctx| {
            async move {
                if let Err(message) = work(core.clone(), ctx).await {
                    core.set_error_message(message);
                }
            }
            .boxed()
        })
    }
}

impl fmt::Debug for FnTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("core", &self.core).finish_non_exhaustive()
    }
}
