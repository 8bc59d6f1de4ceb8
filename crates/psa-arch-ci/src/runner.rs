//! Stage execution and the tolerant tool-call wrapper.

use crate::error::{HarnessError, HarnessResult};
use crate::stage::StageConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Stdout followed by stderr, trailing whitespace trimmed.
    pub fn combined_output(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(self.stdout.trim_end());
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stderr);
        }
        out
    }
}

/// Runs one stage's command.
///
/// A non-zero exit is a normal `Ok` result. `Err` is reserved for
/// failures of the process machinery itself.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, config: &StageConfig) -> HarnessResult<StageResult>;
}

/// Executor that spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(&self, config: &StageConfig) -> HarnessResult<StageResult> {
        let start = Instant::now();

        let Some((exe, args)) = config.command.split_first() else {
            return Err(HarnessError::EmptyCommand(config.name.clone()));
        };

        debug!(stage = %config.name, cwd = %config.working_dir.display(), argv = ?config.command, "Spawning");

        let child = Command::new(exe)
            .args(args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: exe.clone(),
                cwd: config.working_dir.clone(),
                source,
            })?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| HarnessError::Timeout {
                stage: config.name.clone(),
                secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}

/// Exit code of a finished process; signals map to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Tool-call wrapper: runs a stage and mirrors its output to the console.
pub struct ToolRunner;

impl ToolRunner {
    /// Run a stage, print its output, and tolerate a non-zero exit.
    ///
    /// Only errors from the executor (spawn failure, timeout) propagate.
    pub async fn call(
        executor: &dyn CommandExecutor,
        config: &StageConfig,
    ) -> HarnessResult<StageResult> {
        info!(stage = %config.name, "Executing stage");

        let result = executor.execute(config).await?;

        let output = result.combined_output();
        if !output.is_empty() {
            println!("{output}");
        }

        if result.passed() {
            debug!(stage = %config.name, duration_ms = result.duration_ms, "Stage passed");
        } else {
            warn!(
                stage = %config.name,
                exit_code = result.exit_code,
                "Stage exited non-zero, continuing"
            );
        }

        Ok(result)
    }

    /// Run the compliance binary; its exit code becomes the run's status.
    pub async fn run_final(
        executor: &dyn CommandExecutor,
        config: &StageConfig,
    ) -> HarnessResult<(i32, StageResult)> {
        let result = Self::call(executor, config).await?;
        Ok((result.exit_code, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> StageConfig {
        StageConfig::custom(
            name.to_string(),
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            std::env::temp_dir(),
            60,
        )
    }

    #[test]
    fn test_stage_result_passed() {
        let result = StageResult {
            stage_name: "build_crypto".to_string(),
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_stage_result_failed() {
        let result = StageResult {
            stage_name: "build_crypto".to_string(),
            exit_code: 2,
            stdout: "".to_string(),
            stderr: "error".to_string(),
            duration_ms: 100,
            success: false,
        };
        assert!(!result.passed());
    }

    #[test]
    fn test_combined_output_trims() {
        let result = StageResult {
            stage_name: "s".to_string(),
            exit_code: 0,
            stdout: "built\n\n".to_string(),
            stderr: "warning: x\n".to_string(),
            duration_ms: 1,
            success: true,
        };
        assert_eq!(result.combined_output(), "built\nwarning: x");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let config = StageConfig::custom(
            "echo_test".to_string(),
            vec!["echo".to_string(), "hello".to_string()],
            std::env::temp_dir(),
            60,
        );

        let result = SystemExecutor.execute(&config).await.expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::custom(
            "pwd_test".to_string(),
            vec!["pwd".to_string()],
            dir.path(),
            60,
        );

        let result = SystemExecutor.execute(&config).await.unwrap();
        let reported = std::path::PathBuf::from(result.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_call_tolerates_non_zero_exit() {
        let config = sh("fails", "echo broken >&2; exit 3");

        let result = ToolRunner::call(&SystemExecutor, &config)
            .await
            .expect("non-zero exit must not raise");
        assert!(!result.passed());
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr.contains("broken"));
    }

    #[tokio::test]
    async fn test_run_final_forwards_exit_code() {
        let (code, result) = ToolRunner::run_final(&SystemExecutor, &sh("final", "exit 7"))
            .await
            .unwrap();
        assert_eq!(code, 7);
        assert_eq!(result.stage_name, "final");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_final_maps_signal_to_shell_status() {
        let (code, result) =
            ToolRunner::run_final(&SystemExecutor, &sh("killed", "kill -TERM $$"))
                .await
                .unwrap();
        assert_eq!(code, 143);
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let config = StageConfig::custom(
            "missing".to_string(),
            vec!["/nonexistent/psa-arch-crypto-tests".to_string()],
            std::env::temp_dir(),
            0,
        );

        let err = ToolRunner::call(&SystemExecutor, &config).await.unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let config = StageConfig::custom("empty".to_string(), vec![], std::env::temp_dir(), 0);
        let err = SystemExecutor.execute(&config).await.unwrap_err();
        assert!(matches!(err, HarnessError::EmptyCommand(name) if name == "empty"));
    }

    #[tokio::test]
    async fn test_timeout_kills_stage() {
        let config = StageConfig::custom(
            "hang".to_string(),
            vec!["sleep".to_string(), "30".to_string()],
            std::env::temp_dir(),
            1,
        );
        let err = SystemExecutor.execute(&config).await.unwrap_err();
        assert!(matches!(err, HarnessError::Timeout { secs: 1, .. }));
    }
}
