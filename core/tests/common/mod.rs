#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use xtal_core::api::{
    FnTask, Manager, ManagerEvent, SequentialBackend, Task, TaskEvent, TaskEventKind, TaskId,
};

pub const PUMP_TIMEOUT: Duration = Duration::from_secs(10);

/// Release handle for a [`gated`] task.
pub type Gate = oneshot::Sender<Result<(), String>>;

/// A task that runs until its gate is released or it is stopped.
pub fn gated(name: &str) -> (Arc<dyn Task>, Gate) {
    gated_weighted(name, 1)
}

pub fn gated_weighted(name: &str, threads: usize) -> (Arc<dyn Task>, Gate) {
    let (tx, rx) = oneshot::channel::<Result<(), String>>();
    let task = FnTask::new(name, move |_core, ctx| async move {
        tokio::select! {
            res = rx => res.unwrap_or_else(|_| Err("gate dropped".to_string())),
            _ = ctx.cancelled() => Err("stopped".to_string()),
        }
    })
    .with_threads(threads);
    (Arc::new(task), tx)
}

/// A task that finishes immediately and counts how often its work ran.
pub fn counted(name: &str, runs: Arc<AtomicUsize>) -> Arc<dyn Task> {
    Arc::new(FnTask::new(name, move |_core, _ctx| async move {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
}

/// Pump manager events until `pred` holds.
pub async fn pump_until<F>(mgr: &mut Manager, pred: F)
where
    F: Fn(&Manager) -> bool,
{
    tokio::time::timeout(PUMP_TIMEOUT, async {
        while !pred(mgr) {
            mgr.handle_next_event().await;
        }
    })
    .await
    .expect("manager did not reach the expected state in time");
}

pub fn drain(rx: &mut broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn busy_transitions(events: &[ManagerEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|ev| match ev {
            ManagerEvent::BusyStateChanged { busy } => Some(*busy),
            _ => None,
        })
        .collect()
}

pub fn started_ids(events: &[ManagerEvent]) -> Vec<TaskId> {
    events
        .iter()
        .filter_map(|ev| match ev {
            ManagerEvent::TaskStarted { task_id, .. } => Some(*task_id),
            _ => None,
        })
        .collect()
}

/// Run `task` to completion on a sequential backend, outside any manager, and
/// return every lifecycle event it emitted.
pub async fn run_to_end<T: Task>(task: Arc<T>) -> Vec<TaskEventKind> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TaskEvent>();
    task.core().connect(TaskId::new(), tx);
    task.core().attach_backend(Arc::new(SequentialBackend::new()));

    task.start().await;

    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev.kind);
    }
    out
}

/// The single terminal event, asserting there is exactly one.
pub fn terminal(events: &[TaskEventKind]) -> TaskEventKind {
    let terminals: Vec<_> = events.iter().filter(|k| k.is_terminal()).collect();
    assert_eq!(terminals.len(), 1, "expected one terminal event in {events:?}");
    terminals[0].clone()
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
