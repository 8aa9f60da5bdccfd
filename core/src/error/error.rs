use thiserror::Error;

use crate::ids::TaskId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("property '{key}' expects {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("stream io error: {stream} {source}")]
    StreamIo {
        stream: &'static str,
        source: std::io::Error,
    },
}
