use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Finished,
}

/// Notifications re-broadcast by the manager to its listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    TaskAdded { task_id: TaskId, name: String },
    TaskQueued { task_id: TaskId },
    TaskStarted { task_id: TaskId, name: String, weight: usize },
    TaskProgress { task_id: TaskId, percent: u8 },
    TaskProgressText { task_id: TaskId, text: String },
    TaskComplete { task_id: TaskId },
    TaskError { task_id: TaskId, message: String },
    TaskCanceled { task_id: TaskId },
    TaskStopped { task_id: TaskId },
    TaskRemoved { task_id: TaskId },
    BusyStateChanged { busy: bool },
}

impl ManagerEvent {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskAdded { task_id, .. }
            | Self::TaskQueued { task_id }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskProgress { task_id, .. }
            | Self::TaskProgressText { task_id, .. }
            | Self::TaskComplete { task_id }
            | Self::TaskError { task_id, .. }
            | Self::TaskCanceled { task_id }
            | Self::TaskStopped { task_id }
            | Self::TaskRemoved { task_id } => Some(*task_id),
            Self::BusyStateChanged { .. } => None,
        }
    }
}
