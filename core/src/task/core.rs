use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::events::{Progress, TaskEvent, TaskEventKind};
use super::properties::TaskProperties;
use crate::backend::{
    Backend, CompleteFn, Completion, Execution, ProgressFn, WorkContext, WorkFn,
};
use crate::error::PropertyError;
use crate::ids::TaskId;
use crate::util::lock;

/// State shared by every concrete task: properties, the error slot, lifecycle flags,
/// the attached backend and the event link back to whoever owns the task.
///
/// Cloning is cheap and every clone refers to the same task.
#[derive(Clone)]
pub struct TaskCore {
    inner: Arc<Inner>,
}

struct Inner {
    props: Mutex<TaskProperties>,
    error_message: Mutex<String>,
    started: AtomicBool,
    finished: AtomicBool,
    canceled: AtomicBool,
    cancel: CancellationToken,
    backend: Mutex<Option<Arc<dyn Backend>>>,
    link: Mutex<Option<(TaskId, UnboundedSender<TaskEvent>)>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for TaskCore {
    fn default() -> Self {
        Self::new(TaskProperties::default())
    }
}

impl TaskCore {
    pub fn new(props: TaskProperties) -> Self {
        Self {
            inner: Arc::new(Inner {
                props: Mutex::new(props),
                error_message: Mutex::new(String::new()),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                canceled: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                backend: Mutex::new(None),
                link: Mutex::new(None),
                started_at: Mutex::new(None),
                finished_at: Mutex::new(None),
            }),
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(TaskProperties {
            name: name.into(),
            ..TaskProperties::default()
        })
    }

    // ---- properties ----

    pub fn properties(&self) -> TaskProperties {
        lock(&self.inner.props).clone()
    }

    pub fn set_property(&self, key: &str, value: Value) -> Result<(), PropertyError> {
        lock(&self.inner.props).set(key, value)
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        lock(&self.inner.props).get(key)
    }

    pub fn name(&self) -> String {
        lock(&self.inner.props).name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        lock(&self.inner.props).name = name.into();
    }

    pub fn basename(&self) -> Option<String> {
        lock(&self.inner.props).basename.clone()
    }

    pub fn set_basename(&self, basename: impl Into<String>) {
        lock(&self.inner.props).basename = Some(basename.into());
    }

    pub fn threads(&self) -> usize {
        lock(&self.inner.props).threads
    }

    /// Values below 1 are raised to 1.
    pub fn set_threads(&self, threads: usize) {
        lock(&self.inner.props).threads = threads.max(1);
    }

    pub fn overwrite(&self) -> bool {
        lock(&self.inner.props).overwrite
    }

    pub fn set_overwrite(&self, overwrite: bool) {
        lock(&self.inner.props).overwrite = overwrite;
    }

    // ---- outcome ----

    pub fn error_message(&self) -> String {
        lock(&self.inner.error_message).clone()
    }

    /// Record a failure. The first message wins; later ones are logged and dropped.
    pub fn set_error_message(&self, message: impl Into<String>) {
        let message = message.into();
        let mut slot = lock(&self.inner.error_message);
        if slot.is_empty() {
            *slot = message;
        } else {
            tracing::debug!(task = %self.name(), dropped = %message, "error already recorded");
        }
    }

    pub fn has_error(&self) -> bool {
        !lock(&self.inner.error_message).is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.started_at)
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.finished_at)
    }

    // ---- wiring ----

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn attach_backend(&self, backend: Arc<dyn Backend>) {
        *lock(&self.inner.backend) = Some(backend);
    }

    pub fn backend(&self) -> Option<Arc<dyn Backend>> {
        lock(&self.inner.backend).clone()
    }

    /// Route this task's lifecycle events to `tx`, tagged with `id`.
    pub fn connect(&self, id: TaskId, tx: UnboundedSender<TaskEvent>) {
        *lock(&self.inner.link) = Some((id, tx));
    }

    pub fn task_id(&self) -> Option<TaskId> {
        lock(&self.inner.link).as_ref().map(|(id, _)| *id)
    }

    fn emit(&self, kind: TaskEventKind) {
        let link = lock(&self.inner.link);
        match link.as_ref() {
            Some((task_id, tx)) => {
                // A closed receiver means the owner is gone; nobody is listening.
                let _ = tx.send(TaskEvent {
                    task_id: *task_id,
                    kind,
                });
            }
            None => tracing::trace!(task = %self.name(), ?kind, "event on unconnected task"),
        }
    }

    pub fn report_progress(&self, percent: u8) {
        self.emit(TaskEventKind::Progress(percent.min(100)));
    }

    pub fn report_progress_text(&self, text: impl Into<String>) {
        self.emit(TaskEventKind::ProgressText(text.into()));
    }

    /// Cooperative stop: flag the task, cancel its execution token and emit `Stopped`.
    ///
    /// Running work sees the token through its [`WorkContext`]. The terminal event
    /// still fires once the work returns.
    pub fn request_stop(&self) {
        if self.is_finished() {
            return;
        }
        self.inner.canceled.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        tracing::info!(task = %self.name(), task_id = ?self.task_id(), "stop requested");
        self.emit(TaskEventKind::Stopped);
    }

    /// Hand `work` to the attached backend.
    ///
    /// Progress reported through the [`WorkContext`] becomes `Progress`/`ProgressText`
    /// events. When the backend reports completion the task finishes with exactly one
    /// of `Completed` or `ErrorOccurred`, chosen by whether an error was recorded.
    /// A second call is ignored.
    pub fn run<F>(&self, work: F) -> BoxFuture<'static, ()>
    where
        F: FnOnce(WorkContext) -> BoxFuture<'static, ()> + Send + 'static,
    {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(task = %self.name(), "task already started; ignoring");
            return futures::future::ready(()).boxed();
        }
        *lock(&self.inner.started_at) = Some(Utc::now());

        let Some(backend) = self.backend() else {
            tracing::warn!(task = %self.name(), "no backend attached");
            self.set_error_message("no backend attached");
            self.finish(Completion::Finished);
            return futures::future::ready(()).boxed();
        };

        let progress_core = self.clone();
        let on_progress: ProgressFn =
            Arc::new(move |p: Progress| progress_core.emit(TaskEventKind::from(p)));
        let done_core = self.clone();
        let on_complete: CompleteFn = Box::new(move |c| done_core.finish(c));

        let span = tracing::info_span!("task", task_id = ?self.task_id(), name = %self.name());
        let work: WorkFn = Box::new(move |ctx| work(ctx).instrument(span).boxed());

        tracing::debug!(task = %self.name(), backend = backend.name(), "dispatching work");
        backend.execute(Execution {
            work,
            on_progress,
            on_complete,
            cancel: self.inner.cancel.clone(),
        })
    }

    fn finish(&self, completion: Completion) {
        match &completion {
            Completion::Panicked(msg) if !self.has_error() => {
                self.set_error_message(format!("task panicked: {msg}"));
            }
            Completion::Aborted if !self.has_error() => {
                self.set_error_message("task aborted before its work settled");
            }
            _ => {}
        }
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        *lock(&self.inner.finished_at) = Some(Utc::now());

        if self.is_canceled() {
            self.emit(TaskEventKind::Canceled);
        }
        let error = self.error_message();
        if error.is_empty() {
            tracing::info!(task = %self.name(), task_id = ?self.task_id(), "task completed");
            self.emit(TaskEventKind::Completed);
        } else {
            tracing::warn!(task = %self.name(), task_id = ?self.task_id(), error = %error, "task failed");
            self.emit(TaskEventKind::ErrorOccurred(error));
        }
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("name", &self.name())
            .field("task_id", &self.task_id())
            .field("finished", &self.is_finished())
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}
