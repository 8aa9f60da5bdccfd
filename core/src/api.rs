//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `xtal_core::api` instead of reaching into internal modules.

pub use crate::backend::{
    build_backend, Backend, BackendKind, Completion, Execution, SequentialBackend,
    ThreadedBackend,
};
pub use crate::config::{
    load_default, load_from_path, AppConfig, ExternalConfig, LoggingConfig, ManagerConfig,
};
pub use crate::error::{FailureKind, ManagerError, ProgramError, PropertyError};
pub use crate::external::{ExternalProgramTask, FileDependency, ProgramSettings};
pub use crate::ids::TaskId;
pub use crate::manager::{Manager, ManagerEvent, TaskState};
pub use crate::runner::{
    ProcessRunnerPlugin, RunOutcome, RunnerPlugin, RunnerSession, RunnerStartArgs, Signal,
};
pub use crate::task::{
    FnTask, Progress, Task, TaskCore, TaskEvent, TaskEventKind, TaskProperties, WorkContext,
};
pub use tokio_util::sync::CancellationToken;
