use clap::Parser;
mod args;
mod error;
mod jobs;
mod progress;
mod run;

use args::{Args, Commands};
use error::CliError;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = Args::parse();
    let cfg = xtal_core::config::load_default().map_err(|e| CliError::Config(format!("{e:#}")))?;

    match args.command {
        Commands::Run(run_args) => {
            let label = log_label(&run_args.jobs);
            init_tracing(&cfg.logging, &label).map_err(CliError::Logging)?;
            let span = tracing::info_span!("run", jobs = %label);
            let summary = run::run(&run_args, &cfg).instrument(span).await?;
            Ok(summary.exit_code())
        }
        Commands::Check(check_args) => {
            init_tracing(&cfg.logging, "check").map_err(CliError::Logging)?;
            run::check(&check_args)
        }
    }
}

/// Job file stem reduced to characters safe in a file name.
fn log_label(jobs: &std::path::Path) -> String {
    let label: String = jobs
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if label.is_empty() {
        "jobs".to_string()
    } else {
        label
    }
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 1: at least one task failed (returned as a normal exit code)
    // 11: config error
    // 20: job file / IO error
    // 130: interrupted (returned as a normal exit code)
    match e {
        CliError::Config(_) => 11,
        CliError::Jobs(_) => 20,
        CliError::Logging(_) => 20,
    }
}

/// Console plus optional file logging. Each run writes its own file,
/// `xtal-<label>.<pid>.log`, so concurrent batches never interleave.
fn init_tracing(logging: &xtal_core::config::LoggingConfig, label: &str) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("xtal"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("xtal-{label}.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    // Task spans carry the task id and name; the console keeps lines short.
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .with_target(false)
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
