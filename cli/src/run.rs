use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use xtal_core::api::{
    AppConfig, CancellationToken, ExternalProgramTask, Manager, ManagerEvent, Task,
};

use crate::args::{CheckArgs, RunArgs};
use crate::error::CliError;
use crate::jobs;
use crate::progress::ProgressMonitor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
    NotRun,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<(String, Outcome)>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Failed(_)))
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, o)| *o == Outcome::Succeeded)
            .count()
    }

    /// 130 when interrupted, 1 when any task failed, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.failed() > 0 {
            1
        } else {
            0
        }
    }
}

pub async fn run(args: &RunArgs, cfg: &AppConfig) -> Result<RunSummary, CliError> {
    run_with_interrupt(args, cfg, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run the job file until every task settles or `interrupt` resolves.
///
/// On interrupt, tasks not yet started are left out and running ones are stopped,
/// then the manager is pumped until they have all reported back.
pub async fn run_with_interrupt<I>(
    args: &RunArgs,
    cfg: &AppConfig,
    interrupt: I,
) -> Result<RunSummary, CliError>
where
    I: Future<Output = ()> + Send + 'static,
{
    let job = jobs::load(&args.jobs)?;
    let base = jobs::base_dir(&args.jobs);

    let mut manager_cfg = cfg.manager.clone();
    if let Some(n) = job.max_concurrency {
        manager_cfg.max_concurrency = n;
    }
    if let Some(n) = args.max_concurrency {
        manager_cfg.max_concurrency = n;
    }
    if let Some(backend) = args.backend {
        manager_cfg.backend = backend.into();
    }
    let mut external_cfg = cfg.external.clone();
    if args.keep_working_files {
        external_cfg.delete_working_files = false;
    }

    let mut manager = Manager::from_config(&manager_cfg);
    tracing::info!(
        jobs = %args.jobs.display(),
        tasks = job.tasks.len(),
        max_concurrency = manager.maximum_concurrency(),
        backend = manager.backend().name(),
        "starting run"
    );

    let show_progress = !args.no_progress && atty::is(atty::Stream::Stderr);
    let monitor = ProgressMonitor::new(job.tasks.len(), show_progress);
    let renderer = tokio::spawn(render(manager.subscribe(), monitor));

    let tasks: Vec<Arc<ExternalProgramTask>> = job
        .tasks
        .iter()
        .map(|spec| {
            let task = spec.build(&external_cfg, &base);
            let task = if args.keep_working_files {
                task.with_delete_working_files(false)
            } else {
                task
            };
            Arc::new(task)
        })
        .collect();

    // Built before any task is admitted: a sequential backend runs work inside `add`.
    let interrupted = CancellationToken::new();
    let watcher = tokio::spawn(stop_on_interrupt(
        interrupt,
        interrupted.clone(),
        tasks.clone(),
    ));

    for task in &tasks {
        if interrupted.is_cancelled() {
            break;
        }
        manager.add(task.clone(), true).await;
    }

    if !manager.run_until_idle_or(&interrupted).await {
        // Back to front so no queued task is admitted in between.
        for id in manager.pending().into_iter().rev() {
            let _ = manager.remove(id).await;
        }
        for id in manager.running() {
            if let Some(task) = manager.task(id) {
                if !task.core().is_canceled() {
                    task.stop();
                }
            }
        }
        manager.run_until_idle().await;
    }
    watcher.abort();
    let interrupted = interrupted.is_cancelled();

    drop(manager);
    if let Err(e) = renderer.await {
        tracing::warn!(error = %e, "progress renderer failed");
    }

    let results = tasks
        .iter()
        .map(|task| {
            let core = task.core();
            let outcome = if !core.is_finished() {
                Outcome::NotRun
            } else if core.has_error() {
                Outcome::Failed(core.error_message())
            } else {
                Outcome::Succeeded
            };
            (core.name(), outcome)
        })
        .collect();
    let summary = RunSummary {
        results,
        interrupted,
    };

    print_summary(&summary, &tasks);
    Ok(summary)
}

/// Waits for `interrupt`, then flags the run and stops every unfinished task.
///
/// Stopping happens here, not in the pump loop, because inline work on a sequential
/// backend keeps the pump busy until the work returns.
async fn stop_on_interrupt<I>(
    interrupt: I,
    interrupted: CancellationToken,
    tasks: Vec<Arc<ExternalProgramTask>>,
) where
    I: Future<Output = ()>,
{
    interrupt.await;
    tracing::warn!("interrupted; stopping running tasks");
    interrupted.cancel();
    // Queued tasks are stopped too, so one admitted during the race never launches.
    for task in &tasks {
        task.stop();
    }
}

async fn render(mut rx: broadcast::Receiver<ManagerEvent>, mut monitor: ProgressMonitor) {
    let mut all_ok = true;
    loop {
        match rx.recv().await {
            Ok(ManagerEvent::TaskStarted { task_id, name, .. }) => {
                monitor.start_task(task_id, &name)
            }
            Ok(ManagerEvent::TaskProgressText { task_id, text }) => {
                monitor.task_message(task_id, &text)
            }
            Ok(ManagerEvent::TaskProgress { task_id, percent }) => {
                monitor.task_message(task_id, &format!("{percent}%"))
            }
            Ok(ManagerEvent::TaskComplete { task_id }) => monitor.complete_task(task_id, true),
            Ok(ManagerEvent::TaskError { task_id, message }) => {
                all_ok = false;
                tracing::debug!(%task_id, error = %message, "task failed");
                monitor.complete_task(task_id, false);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "progress renderer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    monitor.finish(all_ok);
}

fn print_summary(summary: &RunSummary, tasks: &[Arc<ExternalProgramTask>]) {
    for ((name, outcome), task) in summary.results.iter().zip(tasks) {
        match outcome {
            Outcome::Succeeded => println!("ok    {name}"),
            Outcome::Failed(msg) => {
                let first = msg.lines().next().unwrap_or_default();
                println!("FAIL  {name}: {first}");
            }
            Outcome::NotRun => println!("skip  {name}"),
        }
        if let Some(dir) = task.working_directory() {
            println!("      kept {}", dir.display());
        }
    }
    println!(
        "{} succeeded, {} failed, {} total",
        summary.succeeded(),
        summary.failed(),
        summary.results.len()
    );
}

pub fn check(args: &CheckArgs) -> Result<i32, CliError> {
    let job = jobs::load(&args.jobs)?;
    if let Some(n) = job.max_concurrency {
        println!("max_concurrency = {n}");
    }
    for spec in &job.tasks {
        println!(
            "{}  [{} {}]  threads={} requirements={} outputs={}",
            spec.display_name(),
            spec.executable,
            spec.arguments.join(" "),
            spec.threads.unwrap_or(1),
            spec.requirements.len(),
            spec.outputs.len(),
        );
    }
    println!("{} task(s)", job.tasks.len());
    Ok(0)
}
