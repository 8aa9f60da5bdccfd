use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// A single progress report from running work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    /// Percent complete, 0..=100.
    Value(u8),
    Text(String),
}

/// Lifecycle signal emitted by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskEventKind {
    Progress(u8),
    ProgressText(String),
    Completed,
    ErrorOccurred(String),
    Canceled,
    Stopped,
}

impl TaskEventKind {
    /// Completed and ErrorOccurred end a run; exactly one of them fires per start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::ErrorOccurred(_))
    }
}

impl From<Progress> for TaskEventKind {
    fn from(p: Progress) -> Self {
        match p {
            Progress::Value(v) => Self::Progress(v),
            Progress::Text(t) => Self::ProgressText(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
}
