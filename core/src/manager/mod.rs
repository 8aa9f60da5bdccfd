//! Weighted admission control over a strict FIFO queue.
//!
//! The manager is a single-owner scheduler. Tasks report back over an unbounded
//! channel and the owner pumps it with [`Manager::handle_next_event`],
//! [`Manager::process_pending_events`] or [`Manager::run_until_idle`], so counters
//! and the queue are only ever touched through `&mut self`.
//!
//! A task heavier than the whole ceiling is accepted but never started; it blocks the
//! queue behind it until the ceiling is raised or it is removed.

mod events;

pub use events::{ManagerEvent, TaskState};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::backend::{build_backend, Backend};
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::ids::TaskId;
use crate::task::{Task, TaskEvent, TaskEventKind};

const NOTIFY_CAPACITY: usize = 1024;

struct Entry {
    task: Arc<dyn Task>,
    state: TaskState,
    weight: usize,
}

pub struct Manager {
    backend: Arc<dyn Backend>,
    entries: HashMap<TaskId, Entry>,
    pending: VecDeque<TaskId>,
    current_weight: usize,
    max_weight: usize,
    completed_count: usize,
    total_count: usize,
    event_tx: mpsc::UnboundedSender<TaskEvent>,
    event_rx: mpsc::UnboundedReceiver<TaskEvent>,
    notify_tx: broadcast::Sender<ManagerEvent>,
}

impl Manager {
    pub fn new(backend: Arc<dyn Backend>, max_concurrency: usize) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            backend,
            entries: HashMap::new(),
            pending: VecDeque::new(),
            current_weight: 0,
            max_weight: max_concurrency.max(1),
            completed_count: 0,
            total_count: 0,
            event_tx,
            event_rx,
            notify_tx,
        }
    }

    pub fn from_config(cfg: &ManagerConfig) -> Self {
        Self::new(build_backend(cfg.backend), cfg.max_concurrency)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.notify_tx.subscribe()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Admit `task`. It starts now if `start` is set and its weight fits the free
    /// budget; otherwise it joins the back of the queue.
    pub async fn add(&mut self, task: Arc<dyn Task>, start: bool) -> TaskId {
        let id = TaskId::new();
        let core = task.core();
        core.connect(id, self.event_tx.clone());
        core.attach_backend(self.backend.clone());

        let weight = task.weight().max(1);
        let name = task.name();
        if weight > self.max_weight {
            tracing::warn!(
                task_id = %id,
                task = %name,
                weight,
                max_weight = self.max_weight,
                "task weight exceeds the concurrency ceiling; it cannot start until the ceiling is raised"
            );
        }

        self.entries.insert(
            id,
            Entry {
                task,
                state: TaskState::Pending,
                weight,
            },
        );
        self.total_count += 1;
        self.notify(ManagerEvent::TaskAdded { task_id: id, name });

        if start && self.fits(weight) {
            self.start_task(id).await;
        } else {
            tracing::debug!(task_id = %id, weight, "task queued");
            self.pending.push_back(id);
            self.notify(ManagerEvent::TaskQueued { task_id: id });
        }
        id
    }

    /// Drop a task. A running task gives back its weight and is asked to stop; a
    /// queued one is never started.
    pub async fn remove(&mut self, id: TaskId) -> Result<(), ManagerError> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or(ManagerError::UnknownTask(id))?;

        match entry.state {
            TaskState::Running => {
                self.release(entry.weight);
                entry.task.stop();
            }
            TaskState::Pending => self.pending.retain(|queued| *queued != id),
            TaskState::Finished => {}
        }
        tracing::debug!(task_id = %id, state = ?entry.state, "task removed");
        self.notify(ManagerEvent::TaskRemoved { task_id: id });

        self.start_next_task().await;
        Ok(())
    }

    /// Change the ceiling (minimum 1). Running tasks are never preempted.
    pub async fn set_maximum_concurrency(&mut self, max: usize) {
        if max == 0 {
            tracing::warn!("maximum concurrency of 0 raised to 1");
        }
        self.max_weight = max.max(1);
        tracing::info!(max_weight = self.max_weight, "concurrency ceiling updated");
        self.start_next_task().await;
    }

    /// Start queued tasks in order while the head fits.
    pub async fn start_next_task(&mut self) {
        while let Some(&head) = self.pending.front() {
            let Some(weight) = self.entries.get(&head).map(|e| e.weight) else {
                self.pending.pop_front();
                continue;
            };
            if !self.fits(weight) {
                break;
            }
            self.pending.pop_front();
            self.start_task(head).await;
        }
    }

    async fn start_task(&mut self, id: TaskId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.state = TaskState::Running;
        let weight = entry.weight;
        let task = entry.task.clone();
        let name = task.name();

        self.acquire(weight);
        tracing::info!(task_id = %id, task = %name, weight, current_weight = self.current_weight, "task started");
        self.notify(ManagerEvent::TaskStarted {
            task_id: id,
            name,
            weight,
        });

        task.start().await;
    }

    pub async fn handle_task_complete(&mut self, id: TaskId) {
        if self.settle(id) {
            self.notify(ManagerEvent::TaskComplete { task_id: id });
            self.start_next_task().await;
        }
    }

    pub async fn handle_task_error(&mut self, id: TaskId, message: String) {
        if self.settle(id) {
            self.notify(ManagerEvent::TaskError {
                task_id: id,
                message,
            });
            self.start_next_task().await;
        }
    }

    /// Bookkeeping shared by both terminal outcomes. Returns false for ids that were
    /// removed or are not running.
    fn settle(&mut self, id: TaskId) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            tracing::debug!(task_id = %id, "terminal event for removed task ignored");
            return false;
        };
        if entry.state != TaskState::Running {
            tracing::warn!(task_id = %id, state = ?entry.state, "unexpected terminal event");
            return false;
        }
        entry.state = TaskState::Finished;
        let weight = entry.weight;
        self.release(weight);
        self.completed_count += 1;
        true
    }

    /// Wait for one task event and act on it.
    pub async fn handle_next_event(&mut self) {
        // The manager keeps a sender alive, so the channel never closes.
        if let Some(event) = self.event_rx.recv().await {
            self.dispatch(event).await;
        }
    }

    /// Act on every task event already delivered. Returns how many were handled.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.event_rx.try_recv() {
            self.dispatch(event).await;
            handled += 1;
        }
        handled
    }

    /// Pump events until nothing is running and the queue is empty, or until the
    /// queue head can never be admitted.
    pub async fn run_until_idle(&mut self) {
        self.run_until_idle_or(&CancellationToken::new()).await;
    }

    /// [`run_until_idle`](Self::run_until_idle) that also returns once `interrupt` is
    /// cancelled. Returns false when interrupted.
    ///
    /// The token is only checked between events. A dispatch, including inline work on
    /// a sequential backend, is never cut short, so no task loses its terminal event.
    pub async fn run_until_idle_or(&mut self, interrupt: &CancellationToken) -> bool {
        loop {
            if interrupt.is_cancelled() {
                tracing::debug!(running = self.running().len(), queued = self.pending.len(), "pump interrupted");
                return false;
            }
            self.process_pending_events().await;
            if self.current_weight == 0 {
                if self.pending.is_empty() {
                    return true;
                }
                self.start_next_task().await;
                if self.current_weight == 0 {
                    tracing::warn!(
                        queued = self.pending.len(),
                        max_weight = self.max_weight,
                        "queue head does not fit the concurrency ceiling; stopping"
                    );
                    return true;
                }
                continue;
            }

            let event = tokio::select! {
                biased;
                _ = interrupt.cancelled() => continue,
                event = self.event_rx.recv() => event,
            };
            if let Some(event) = event {
                self.dispatch(event).await;
            }
        }
    }

    async fn dispatch(&mut self, event: TaskEvent) {
        let TaskEvent { task_id, kind } = event;
        if !self.entries.contains_key(&task_id) {
            tracing::trace!(%task_id, ?kind, "event for removed task dropped");
            return;
        }
        match kind {
            TaskEventKind::Progress(percent) => {
                self.notify(ManagerEvent::TaskProgress { task_id, percent })
            }
            TaskEventKind::ProgressText(text) => {
                self.notify(ManagerEvent::TaskProgressText { task_id, text })
            }
            TaskEventKind::Canceled => self.notify(ManagerEvent::TaskCanceled { task_id }),
            TaskEventKind::Stopped => self.notify(ManagerEvent::TaskStopped { task_id }),
            TaskEventKind::Completed => self.handle_task_complete(task_id).await,
            TaskEventKind::ErrorOccurred(message) => {
                self.handle_task_error(task_id, message).await
            }
        }
    }

    fn fits(&self, weight: usize) -> bool {
        self.current_weight + weight <= self.max_weight
    }

    fn acquire(&mut self, weight: usize) {
        let was_idle = self.current_weight == 0;
        self.current_weight += weight;
        if was_idle && self.current_weight > 0 {
            self.notify(ManagerEvent::BusyStateChanged { busy: true });
        }
    }

    fn release(&mut self, weight: usize) {
        let was_busy = self.current_weight > 0;
        self.current_weight = self.current_weight.saturating_sub(weight);
        if was_busy && self.current_weight == 0 {
            self.notify(ManagerEvent::BusyStateChanged { busy: false });
        }
    }

    fn notify(&self, event: ManagerEvent) {
        // No subscribers is fine.
        let _ = self.notify_tx.send(event);
    }

    // ---- queries ----

    pub fn busy(&self) -> bool {
        self.current_weight > 0
    }

    pub fn num_finished(&self) -> usize {
        self.completed_count
    }

    pub fn num_total(&self) -> usize {
        self.total_count
    }

    pub fn current_weight(&self) -> usize {
        self.current_weight
    }

    pub fn maximum_concurrency(&self) -> usize {
        self.max_weight
    }

    pub fn pending(&self) -> Vec<TaskId> {
        self.pending.iter().copied().collect()
    }

    pub fn running(&self) -> Vec<TaskId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == TaskState::Running)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.entries.get(&id).map(|e| e.state)
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<dyn Task>> {
        self.entries.get(&id).map(|e| e.task.clone())
    }
}
