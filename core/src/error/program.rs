use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why an external program run failed.
///
/// The `Display` form is what ends up in the task's error slot, so every variant
/// names the program or file involved.
#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("failed to create working directory: {error}")]
    WorkingDirectory {
        #[source]
        error: std::io::Error,
    },

    #[error("failed to stage {} -> {}: {error}", .from.display(), .to.display())]
    Staging {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program}: process crashed{}", captured("", .stderr))]
    Crashed { program: String, stderr: String },

    #[error("{program} exited with code {code}{}", captured(.stdout, .stderr))]
    NonzeroExit {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{program} timed out after {:.1}s", .timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("failed to extract output {} -> {}: {error}", .from.display(), .to.display())]
    Extraction {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("expected output {} is missing after extraction", .0.display())]
    MissingOutput(PathBuf),
}

/// Coarse failure classes, used for summaries and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Staging,
    Launch,
    Crash,
    NonzeroExit,
    Timeout,
    Cancelled,
    Extraction,
}

impl ProgramError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::WorkingDirectory { .. } | Self::Staging { .. } => FailureKind::Staging,
            Self::Launch { .. } => FailureKind::Launch,
            Self::Crashed { .. } => FailureKind::Crash,
            Self::NonzeroExit { .. } => FailureKind::NonzeroExit,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Extraction { .. } | Self::MissingOutput(_) => FailureKind::Extraction,
        }
    }
}

fn captured(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    let stdout = stdout.trim_end();
    let stderr = stderr.trim_end();
    if !stdout.is_empty() {
        out.push_str("\nstdout:\n");
        out.push_str(stdout);
    }
    if !stderr.is_empty() {
        out.push_str("\nstderr:\n");
        out.push_str(stderr);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_exit_message_carries_code_and_output() {
        let err = ProgramError::NonzeroExit {
            program: "orca".into(),
            code: 3,
            stdout: "partial\n".into(),
            stderr: "SCF not converged\n".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("orca exited with code 3"));
        assert!(msg.contains("stdout:\npartial"));
        assert!(msg.contains("stderr:\nSCF not converged"));
        assert_eq!(err.kind(), FailureKind::NonzeroExit);
    }

    #[test]
    fn nonzero_exit_without_output_is_one_line() {
        let err = ProgramError::NonzeroExit {
            program: "gulp".into(),
            code: 1,
            stdout: String::new(),
            stderr: "  \n".into(),
        };
        assert_eq!(err.to_string(), "gulp exited with code 1");
    }

    #[test]
    fn crash_message_mentions_crash() {
        let err = ProgramError::Crashed {
            program: "xtb".into(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "xtb: process crashed");
        assert_eq!(err.kind(), FailureKind::Crash);
    }

    #[test]
    fn staging_errors_show_both_paths() {
        let err = ProgramError::Staging {
            from: PathBuf::from("/data/mol.xyz"),
            to: PathBuf::from("/tmp/xtal-1/input.xyz"),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/mol.xyz -> /tmp/xtal-1/input.xyz"));
        assert_eq!(err.kind(), FailureKind::Staging);
    }
}
