//! PSA Arch Test - PSA Crypto API compliance runner
//!
//! Run from the root of the crypto library checkout. The `psa-arch-test`
//! command clones `psa-arch-tests` and `mbedtls-test` into a scratch
//! directory, rebuilds the library, builds and links the compliance suite,
//! runs it, and exits with its status.
//!
//! ## Commands
//!
//! - `run` (default): execute the pipeline
//! - `plan`: show the steps a run would execute
//! - `config`: show the effective configuration and its digest
//!
//! Exit status is the compliance binary's own, or 2 when the harness
//! itself fails.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use psa_arch_ci::{
    FailurePolicy, HarnessConfig, HarnessLayout, PlannedStep, PsaPipeline, SystemExecutor,
    INTERNAL_FAILURE_EXIT_CODE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, Level};

#[derive(Parser)]
#[command(name = "psa-arch-test")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PSA Crypto API compliance tests for the crypto library", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    harness: HarnessArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone, build, link and run the compliance suite
    Run,

    /// Print the steps a run would execute, without running them
    Plan {
        /// Output format
        #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
}

/// Overrides for the harness configuration. Every flag is optional.
#[derive(Args)]
struct HarnessArgs {
    /// Crypto library root (default: current directory)
    #[arg(long, global = true, env = "PSA_START_DIR")]
    start_dir: Option<PathBuf>,

    /// Stop at the first tool that exits non-zero
    #[arg(long, global = true)]
    fail_fast: bool,

    /// Per-step timeout in seconds (0 = none)
    #[arg(long, global = true, env = "PSA_STEP_TIMEOUT", default_value = "0")]
    timeout_secs: u64,

    /// Write a JSON run report to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// git executable
    #[arg(long, global = true, env = "PSA_GIT")]
    git: Option<String>,

    /// make executable
    #[arg(long, global = true, env = "PSA_MAKE")]
    make: Option<String>,

    /// C compiler used for the test stub and the final link
    #[arg(long, global = true, env = "PSA_CC")]
    cc: Option<String>,

    /// cmake executable
    #[arg(long, global = true, env = "PSA_CMAKE")]
    cmake: Option<String>,

    /// psa-arch-tests repository URL
    #[arg(long, global = true, env = "PSA_ARCH_TESTS_REPO")]
    arch_tests_repo: Option<String>,

    /// psa-arch-tests branch
    #[arg(long, global = true, env = "PSA_ARCH_TESTS_BRANCH")]
    arch_tests_branch: Option<String>,

    /// mbedtls-test repository URL
    #[arg(long, global = true, env = "PSA_MBEDTLS_TEST_REPO")]
    mbedtls_test_repo: Option<String>,

    /// mbedtls-test branch
    #[arg(long, global = true, env = "PSA_MBEDTLS_TEST_BRANCH")]
    mbedtls_test_branch: Option<String>,
}

impl HarnessArgs {
    fn to_config(&self) -> HarnessConfig {
        let mut config = HarnessConfig {
            step_timeout_secs: self.timeout_secs,
            ..HarnessConfig::default()
        };
        if self.fail_fast {
            config.failure_policy = FailurePolicy::FailFast;
        }

        let overrides = [
            (&self.git, &mut config.git_command),
            (&self.make, &mut config.make_command),
            (&self.cc, &mut config.gcc_command),
            (&self.cmake, &mut config.cmake_command),
            (&self.arch_tests_repo, &mut config.psa_arch_tests_repo),
            (&self.arch_tests_branch, &mut config.psa_arch_tests_branch),
            (&self.mbedtls_test_repo, &mut config.mbedtls_test_repo),
            (&self.mbedtls_test_branch, &mut config.mbedtls_test_branch),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        config
    }

    fn resolve_start_dir(&self) -> Result<PathBuf> {
        match &self.start_dir {
            Some(dir) => dir
                .canonicalize()
                .with_context(|| format!("Start directory {} not found", dir.display())),
            None => std::env::current_dir().context("Failed to read current directory"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    psa_arch_ci::telemetry::init_tracing(cli.json, level);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "psa-arch-test failed");
            eprintln!("{e:?}");
            INTERNAL_FAILURE_EXIT_CODE
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config = cli.harness.to_config();
    let start_dir = cli.harness.resolve_start_dir()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&config, &start_dir, cli.harness.report.as_deref()).await,
        Commands::Plan { format } => cmd_plan(&config, &start_dir, format),
        Commands::Config => cmd_config(&config),
    }
}

/// Run the compliance pipeline and print a stage summary
async fn cmd_run(config: &HarnessConfig, start_dir: &Path, report: Option<&Path>) -> Result<i32> {
    println!("Current working directory is : {}", start_dir.display());
    println!();

    let result = PsaPipeline::execute(Arc::new(SystemExecutor), config, start_dir).await;

    println!();
    println!("Run ID: {}", result.run_id);
    for stage_result in &result.stages {
        let status = if stage_result.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status, stage_result.stage_name, stage_result.duration_ms, stage_result.exit_code
        );
    }
    if let Some(stage) = &result.aborted_at {
        println!("Aborted after: {}", stage);
    }
    println!(
        "Summary: {}/{} stages passed, exit code {}",
        result.passed_count(),
        result.stages.len(),
        result.exit_code
    );

    if let Some(path) = report {
        // A lost report must not mask the compliance status.
        if let Err(e) = result.write_report(path).await {
            error!(path = %path.display(), error = %e, "Failed to write run report");
        }
    }

    Ok(result.exit_code)
}

/// Print the planned steps
fn cmd_plan(config: &HarnessConfig, start_dir: &Path, format: PlanFormat) -> Result<i32> {
    config.validate()?;
    HarnessLayout::check_start_dir(start_dir)?;
    let layout = HarnessLayout::new(start_dir, config);
    let steps = PsaPipeline::plan(config, &layout);

    match format {
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
        PlanFormat::Text => {
            for (i, step) in steps.iter().enumerate() {
                match step {
                    PlannedStep::ResetDirectory { name, path } => {
                        println!("{:>2}. {} (reset {})", i + 1, name, path.display());
                    }
                    PlannedStep::Command(stage) => {
                        println!("{:>2}. {} [{}]", i + 1, stage.name, stage.working_dir.display());
                        println!("      {}", stage.command.join(" "));
                    }
                }
            }
        }
    }
    Ok(0)
}

/// Print the effective configuration
fn cmd_config(config: &HarnessConfig) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(config)?);
    println!("Digest: {}", config.digest()?);
    Ok(0)
}
