//! The unit of work the [`Manager`](crate::manager::Manager) schedules.
//!
//! Concrete tasks embed a [`TaskCore`] and implement [`Task::start`] by handing their
//! work to [`TaskCore::run`]. Everything else (events, error slot, cancellation) is
//! provided by the core.

mod closure;
mod core;
mod events;
mod properties;

pub use self::closure::FnTask;
pub use self::core::TaskCore;
pub use self::events::{Progress, TaskEvent, TaskEventKind};
pub use self::properties::TaskProperties;
pub use crate::backend::WorkContext;

use std::sync::Arc;

use futures::future::BoxFuture;

pub trait Task: Send + Sync + 'static {
    fn core(&self) -> &TaskCore;

    /// Begin execution. The returned future follows the attached backend: it resolves
    /// after the work for inline backends and right away for pooled ones.
    fn start(self: Arc<Self>) -> BoxFuture<'static, ()>;

    fn stop(&self) {
        self.core().request_stop();
    }

    /// Concurrency budget consumed while running.
    fn weight(&self) -> usize {
        self.core().threads()
    }

    fn name(&self) -> String {
        self.core().name()
    }
}
