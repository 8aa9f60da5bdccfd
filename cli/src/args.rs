use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use xtal_core::api::BackendKind;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    Threaded,
    Sequential,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Threaded => BackendKind::Threaded,
            BackendArg::Sequential => BackendKind::Sequential,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "xtal", version, about = "Run batches of external programs under a concurrency budget")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Job file describing the tasks to run.
    pub jobs: PathBuf,

    /// Concurrency ceiling in thread-weight units. Overrides config and job file.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Keep every task's working directory for inspection.
    #[arg(long, default_value_t = false)]
    pub keep_working_files: bool,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CheckArgs {
    pub jobs: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every task in a job file.
    Run(RunArgs),
    /// Parse a job file and list its tasks without running anything.
    Check(CheckArgs),
}
