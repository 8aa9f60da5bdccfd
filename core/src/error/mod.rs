#[allow(clippy::module_inception)]
pub mod error;
pub mod program;

pub use error::{ManagerError, PropertyError, RunnerError};
pub use program::{FailureKind, ProgramError};
