//! Tasks that run external programs in a throwaway working directory.

mod dependency;
mod program;

pub use dependency::FileDependency;
pub use program::{ExternalProgramTask, ProgramSettings};
