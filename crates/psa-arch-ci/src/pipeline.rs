//! Compliance pipeline orchestration and run reporting.

use crate::config::{FailurePolicy, HarnessConfig};
use crate::error::HarnessResult;
use crate::layout::HarnessLayout;
use crate::runner::{CommandExecutor, StageResult, ToolRunner};
use crate::stage::{BuiltinStage, StageConfig};
use crate::workdir;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Exit status for failures inside the harness itself, as opposed to a
/// status reported by the compliance binary.
pub const INTERNAL_FAILURE_EXIT_CODE: i32 = 2;

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedStep {
    /// Remove and recreate a directory.
    ResetDirectory { name: String, path: PathBuf },

    /// Run an external tool.
    Command(StageConfig),
}

impl PlannedStep {
    pub fn name(&self) -> &str {
        match self {
            PlannedStep::ResetDirectory { name, .. } => name,
            PlannedStep::Command(stage) => &stage.name,
        }
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique id of this run.
    pub run_id: String,

    pub started_at: DateTime<Utc>,

    /// Digest of the configuration the run used.
    pub config_digest: String,

    /// Results of the stages that ran, in order.
    pub stages: Vec<StageResult>,

    /// Stage that stopped a fail-fast run.
    pub aborted_at: Option<String>,

    /// Internal failure that ended the run, if any.
    pub internal_error: Option<String>,

    /// Whether the scratch directory was removed afterwards.
    pub cleaned_up: bool,

    /// Status the process should exit with.
    pub exit_code: i32,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    fn new(config_digest: String) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config_digest,
            stages: Vec::new(),
            aborted_at: None,
            internal_error: None,
            cleaned_up: false,
            exit_code: INTERNAL_FAILURE_EXIT_CODE,
            duration_ms: 0,
        }
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// Write this result as pretty-printed JSON.
    pub async fn write_report(&self, path: &Path) -> HarnessResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Run report written");
        Ok(())
    }
}

/// Compliance pipeline orchestrator.
pub struct PsaPipeline;

impl PsaPipeline {
    /// Ordered steps for a run: clones and the crypto build in the scratch
    /// directory, then the suite build, link and run in the build directory.
    pub fn plan(config: &HarnessConfig, layout: &HarnessLayout) -> Vec<PlannedStep> {
        let mut steps = vec![PlannedStep::ResetDirectory {
            name: "create_work_directory".to_string(),
            path: layout.work_dir.clone(),
        }];
        steps.extend(
            BuiltinStage::PREPARE
                .iter()
                .map(|s| PlannedStep::Command(StageConfig::from_builtin(*s, config, layout))),
        );
        steps.push(PlannedStep::ResetDirectory {
            name: "prepare_build_directory".to_string(),
            path: layout.build_dir.clone(),
        });
        steps.extend(
            BuiltinStage::BUILD
                .iter()
                .map(|s| PlannedStep::Command(StageConfig::from_builtin(*s, config, layout))),
        );
        steps
    }

    /// Execute `steps` in order and return the status of the final command.
    ///
    /// Stage results are appended to `record` as they complete, so a caller
    /// still sees them when an internal error cuts the run short.
    pub async fn run(
        executor: &dyn CommandExecutor,
        steps: &[PlannedStep],
        policy: FailurePolicy,
        record: &mut PipelineResult,
    ) -> HarnessResult<i32> {
        let final_index = steps
            .iter()
            .rposition(|s| matches!(s, PlannedStep::Command(_)));
        let mut exit_code = 0;

        for (index, step) in steps.iter().enumerate() {
            let stage = match step {
                PlannedStep::ResetDirectory { name, path } => {
                    info!(step = %name, path = %path.display(), "Resetting directory");
                    workdir::reset_directory(path).await?;
                    continue;
                }
                PlannedStep::Command(stage) => stage,
            };

            if Some(index) == final_index {
                let (code, result) = ToolRunner::run_final(executor, stage).await?;
                record.stages.push(result);
                exit_code = code;
                continue;
            }

            let result = ToolRunner::call(executor, stage).await?;
            let passed = result.passed();
            let code = result.exit_code;
            record.stages.push(result);

            if !passed && policy == FailurePolicy::FailFast {
                warn!(stage = %stage.name, exit_code = code, "Aborting remaining stages");
                record.aborted_at = Some(stage.name.clone());
                return Ok(if code > 0 { code } else { 1 });
            }
        }

        Ok(exit_code)
    }

    /// Run the whole compliance pipeline from `start_dir`.
    ///
    /// Never fails: internal errors are printed with their cause chain and
    /// turned into [`INTERNAL_FAILURE_EXIT_CODE`]. The scratch directory is
    /// removed on every path once the configuration and start directory
    /// have been accepted.
    pub async fn execute(
        executor: Arc<dyn CommandExecutor>,
        config: &HarnessConfig,
        start_dir: &Path,
    ) -> PipelineResult {
        let start = Instant::now();
        let digest = config.digest().unwrap_or_default();
        let mut record = PipelineResult::new(digest);

        if let Err(e) = config
            .validate()
            .and_then(|()| HarnessLayout::check_start_dir(start_dir))
        {
            let err = anyhow::Error::new(e);
            let message = format!("{err:#}");
            error!(error = %message, "Refusing to start");
            record.internal_error = Some(message);
            eprintln!("{err:?}");
            record.duration_ms = start.elapsed().as_millis() as u64;
            return record;
        }

        let layout = HarnessLayout::new(start_dir, config);
        info!(run_id = %record.run_id, start_dir = %layout.start_dir.display(), "Starting PSA compliance pipeline");

        let steps = Self::plan(config, &layout);
        let outcome =
            Self::run(executor.as_ref(), &steps, config.failure_policy, &mut record).await;

        record.exit_code = match outcome {
            Ok(code) => code,
            Err(e) => {
                let err = anyhow::Error::new(e);
                let message = format!("{err:#}");
                error!(error = %message, "Pipeline failed with an internal error");
                record.internal_error = Some(message);
                eprintln!("{err:?}");
                INTERNAL_FAILURE_EXIT_CODE
            }
        };

        record.cleaned_up = workdir::cleanup(&layout.work_dir).await;
        record.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            run_id = %record.run_id,
            exit_code = record.exit_code,
            passed = record.passed_count(),
            failed = record.failed_count(),
            "PSA compliance pipeline finished"
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, exit_code: i32) -> StageResult {
        StageResult {
            stage_name: name.to_string(),
            exit_code,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: exit_code == 0,
        }
    }

    #[test]
    fn test_plan_order() {
        let config = HarnessConfig::default();
        let layout = HarnessLayout::new("/src/crypto", &config);
        let names: Vec<String> = PsaPipeline::plan(&config, &layout)
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "create_work_directory",
                "clone_psa_arch_tests",
                "clone_mbedtls_test",
                "clean_crypto",
                "build_crypto",
                "compile_test_main",
                "prepare_build_directory",
                "configure_psa_tests",
                "build_psa_tests",
                "link_psa_tests",
                "run_psa_tests",
            ]
        );
    }

    #[test]
    fn test_plan_resets_expected_paths() {
        let config = HarnessConfig::default();
        let layout = HarnessLayout::new("/src/crypto", &config);
        let resets: Vec<PathBuf> = PsaPipeline::plan(&config, &layout)
            .into_iter()
            .filter_map(|s| match s {
                PlannedStep::ResetDirectory { path, .. } => Some(path),
                PlannedStep::Command(_) => None,
            })
            .collect();
        assert_eq!(resets, vec![layout.work_dir.clone(), layout.build_dir.clone()]);
    }

    #[test]
    fn test_pipeline_result_counts() {
        let mut result = PipelineResult::new("abc123".to_string());
        result.stages = vec![stage("clean_crypto", 0), stage("build_crypto", 2)];

        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.exit_code, INTERNAL_FAILURE_EXIT_CODE);
        assert!(!result.run_id.is_empty());
    }

    #[tokio::test]
    async fn test_write_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut result = PipelineResult::new("abc123".to_string());
        result.stages.push(stage("run_psa_tests", 0));
        result.exit_code = 0;

        result.write_report(&path).await.unwrap();

        let loaded: PipelineResult =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, result.run_id);
        assert_eq!(loaded.exit_code, 0);
        assert_eq!(loaded.stages, result.stages);
    }
}
