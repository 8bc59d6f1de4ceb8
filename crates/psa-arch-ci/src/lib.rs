//! PSA Arch CI - PSA Crypto API compliance pipeline
//!
//! Provides a pipeline orchestrator that:
//! - Clones `psa-arch-tests` and `mbedtls-test` into a scratch directory
//! - Rebuilds the crypto library and the compliance suite
//! - Links and runs the compliance binary, forwarding its exit status
//! - Always removes the scratch directory afterwards

pub mod config;
pub mod error;
pub mod fakes;
pub mod layout;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod workdir;

// Re-export key types
pub use config::{FailurePolicy, HarnessConfig};
pub use error::{HarnessError, HarnessResult};
pub use layout::HarnessLayout;
pub use pipeline::{PipelineResult, PlannedStep, PsaPipeline, INTERNAL_FAILURE_EXIT_CODE};
pub use runner::{CommandExecutor, StageResult, SystemExecutor, ToolRunner};
pub use stage::{BuiltinStage, StageConfig};
