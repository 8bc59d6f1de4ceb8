//! Harness configuration and identity.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path};

/// What to do when a tool exits non-zero before the final test run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the failure and keep going with the next step.
    #[default]
    Continue,

    /// Stop at the first failing tool and exit with its status.
    FailFast,
}

/// Fixed parameters for every external invocation of a run.
///
/// The defaults are the values the compliance job has always used;
/// everything can be overridden from the command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    pub git_command: String,
    pub cmake_command: String,
    pub make_command: String,
    pub gcc_command: String,

    /// Scratch directory, relative to the start directory.
    pub working_folder: String,

    /// Build directory, relative to `psa-arch-tests/api-tests`.
    pub cmake_build_folder: String,

    pub psa_arch_tests_repo: String,
    pub psa_arch_tests_branch: String,
    pub mbedtls_test_repo: String,
    pub mbedtls_test_branch: String,

    /// cmake `-G` generator name.
    pub cmake_generator: String,
    pub toolchain: String,
    pub target: String,
    pub suite: String,
    pub cpu_arch: String,

    /// Name of the linked compliance executable.
    pub test_binary_name: String,

    /// Per-step timeout in seconds (0 = wait forever).
    pub step_timeout_secs: u64,

    pub failure_policy: FailurePolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            git_command: "git".to_string(),
            cmake_command: "cmake".to_string(),
            make_command: "make".to_string(),
            gcc_command: "gcc".to_string(),
            working_folder: "psa-tests-temp".to_string(),
            cmake_build_folder: "cmake_build".to_string(),
            psa_arch_tests_repo: "git@github.com:jainvikas8/psa-arch-tests.git".to_string(),
            psa_arch_tests_branch: "linux-target-support".to_string(),
            mbedtls_test_repo: "git@github.com:ARMmbed/mbedtls-test.git".to_string(),
            mbedtls_test_branch: "dev/jainvikas8/automate-psa".to_string(),
            cmake_generator: "Unix Makefiles".to_string(),
            toolchain: "HOST_GCC".to_string(),
            target: "tgt_dev_apis_stdc".to_string(),
            suite: "CRYPTO".to_string(),
            cpu_arch: "armv7m".to_string(),
            test_binary_name: "psa-arch-crypto-tests".to_string(),
            step_timeout_secs: 0,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl HarnessConfig {
    /// Reject configurations that could make reset or cleanup touch
    /// anything outside the scratch directory.
    pub fn validate(&self) -> HarnessResult<()> {
        for (field, value) in [
            ("git_command", &self.git_command),
            ("cmake_command", &self.cmake_command),
            ("make_command", &self.make_command),
            ("gcc_command", &self.gcc_command),
        ] {
            if value.trim().is_empty() {
                return Err(HarnessError::InvalidConfig(format!("{field} is empty")));
            }
        }

        check_single_component("working_folder", &self.working_folder)?;
        check_single_component("cmake_build_folder", &self.cmake_build_folder)?;
        check_single_component("test_binary_name", &self.test_binary_name)?;
        Ok(())
    }

    /// SHA-256 digest of the JSON encoding, identifying this configuration
    /// in run reports.
    pub fn digest(&self) -> HarnessResult<String> {
        let encoded = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// A folder name must be exactly one normal path component.
fn check_single_component(field: &str, value: &str) -> HarnessResult<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == value => Ok(()),
        _ => Err(HarnessError::InvalidConfig(format!(
            "{field} must be a single directory name, got '{value}'"
        ))),
    }
}
