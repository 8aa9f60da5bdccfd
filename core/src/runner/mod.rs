//! Process-spawning seam used by [`ExternalProgramTask`](crate::external::ExternalProgramTask).

mod io_pump;
mod process;
mod traits;
pub mod types;

pub use io_pump::pump;
pub use process::ProcessRunnerPlugin;
pub use traits::{RunnerPlugin, RunnerSession};
pub use types::{RunOutcome, RunnerStartArgs, Signal};
