use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use xtal_core::api::TaskId;

/// Terminal progress: one overall bar plus a spinner per running task.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: HashMap<TaskId, ProgressBar>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: HashMap::new(),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        overall.set_message("waiting for capacity");

        Self {
            multi,
            overall,
            task_bars: HashMap::new(),
            enabled: true,
        }
    }

    pub fn start_task(&mut self, id: TaskId, name: &str) {
        if !self.enabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.green} {prefix} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.set_prefix(name.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        self.task_bars.insert(id, bar);
        self.overall.set_message(format!("{} running", self.task_bars.len()));
    }

    pub fn task_message(&self, id: TaskId, msg: &str) {
        if let Some(bar) = self.task_bars.get(&id) {
            bar.set_message(msg.to_string());
        }
    }

    pub fn complete_task(&mut self, id: TaskId, success: bool) {
        if !self.enabled {
            return;
        }
        if let Some(bar) = self.task_bars.remove(&id) {
            let icon = if success { "✅" } else { "❌" };
            bar.set_message(String::new());
            bar.finish_with_message(icon);
        }
        self.overall.inc(1);
        self.overall.set_message(format!("{} running", self.task_bars.len()));
    }

    pub fn finish(&self, success: bool) {
        if !self.enabled {
            return;
        }
        let msg = if success {
            "✅ all tasks completed"
        } else {
            "❌ some tasks failed"
        };
        self.overall.finish_with_message(msg);
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, bar) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_monitor_ignores_updates() {
        let mut monitor = ProgressMonitor::new(2, false);
        let id = TaskId::new();
        monitor.start_task(id, "orca");
        monitor.task_message(id, "running for 3s");
        monitor.complete_task(id, true);
        monitor.finish(true);
        assert!(monitor.task_bars.is_empty());
    }

    #[test]
    fn completed_tasks_drop_their_spinner() {
        let mut monitor = ProgressMonitor::new(2, true);
        let a = TaskId::new();
        let b = TaskId::new();
        monitor.start_task(a, "a");
        monitor.start_task(b, "b");
        monitor.complete_task(a, true);

        assert_eq!(monitor.task_bars.len(), 1);
        assert_eq!(monitor.overall.position(), 1);
        monitor.complete_task(b, false);
        monitor.finish(false);
    }
}
