//! Error types for the compliance pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a pipeline run.
///
/// A tool exiting non-zero is not an error; it is reported through
/// [`crate::StageResult`]. Everything here is an internal failure and
/// ends the run with the sentinel exit status.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Removing or creating a scratch directory failed
    #[error("failed to {action} directory {}", .path.display())]
    WorkDir {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tool could not be started (missing binary, bad working dir)
    #[error("failed to run '{program}' in {}", .cwd.display())]
    Spawn {
        program: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stage was configured without a program
    #[error("stage {0} has empty command")]
    EmptyCommand(String),

    /// Stage exceeded its timeout and was killed
    #[error("stage {stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    /// Configuration rejected before anything was touched
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_names_program_and_directory() {
        let err = HarnessError::Spawn {
            program: "gcc".to_string(),
            cwd: PathBuf::from("/tmp/work"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.contains("'gcc'"), "got: {msg}");
        assert!(msg.contains("/tmp/work"), "got: {msg}");
    }

    #[test]
    fn workdir_error_keeps_source() {
        let err = HarnessError::WorkDir {
            action: "create",
            path: PathBuf::from("psa-tests-temp"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.to_string(), "failed to create directory psa-tests-temp");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_chain_reports_io_cause_once() {
        let err = HarnessError::WorkDir {
            action: "remove",
            path: PathBuf::from("/tmp/psa-tests-temp"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            ),
        };
        let trace = format!("{:?}", anyhow::Error::new(err));
        assert_eq!(trace.matches("No such file or directory").count(), 1, "{trace}");
        assert!(trace.contains("Caused by:"), "{trace}");
    }
}
