//! Pipeline stage definitions and configuration.

use crate::config::HarnessConfig;
use crate::layout::{HarnessLayout, ARCH_TESTS_DIR, MBEDTLS_TEST_DIR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Builtin compliance stages, in pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// git clone <psa-arch-tests> -b <branch> psa-arch-tests
    CloneArchTests,

    /// git clone <mbedtls-test> -b <branch> mbedtls-test
    CloneMbedtlsTest,

    /// make -C <crypto root> clean
    CleanCrypto,

    /// make -C <crypto root> -j
    BuildCrypto,

    /// gcc -Wall -Werror -c -o main.o main.c
    CompileTestMain,

    /// cmake <api-tests> -G<generator> -D...
    ConfigureArchTests,

    /// cmake --build <build dir>
    BuildArchTests,

    /// gcc -o <test binary> main.o <suite archives> libmbedcrypto.a
    LinkArchTests,

    /// <test binary>
    RunArchTests,
}

impl BuiltinStage {
    /// Stages that run before the build directory is reset.
    pub const PREPARE: [BuiltinStage; 5] = [
        BuiltinStage::CloneArchTests,
        BuiltinStage::CloneMbedtlsTest,
        BuiltinStage::CleanCrypto,
        BuiltinStage::BuildCrypto,
        BuiltinStage::CompileTestMain,
    ];

    /// Stages that run inside the build directory, ending with the test run.
    pub const BUILD: [BuiltinStage; 4] = [
        BuiltinStage::ConfigureArchTests,
        BuiltinStage::BuildArchTests,
        BuiltinStage::LinkArchTests,
        BuiltinStage::RunArchTests,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::CloneArchTests => "clone_psa_arch_tests",
            BuiltinStage::CloneMbedtlsTest => "clone_mbedtls_test",
            BuiltinStage::CleanCrypto => "clean_crypto",
            BuiltinStage::BuildCrypto => "build_crypto",
            BuiltinStage::CompileTestMain => "compile_test_main",
            BuiltinStage::ConfigureArchTests => "configure_psa_tests",
            BuiltinStage::BuildArchTests => "build_psa_tests",
            BuiltinStage::LinkArchTests => "link_psa_tests",
            BuiltinStage::RunArchTests => "run_psa_tests",
        }
    }

    /// Get the stage's command (first element is the executable).
    pub fn command(&self, config: &HarnessConfig, layout: &HarnessLayout) -> Vec<String> {
        match self {
            BuiltinStage::CloneArchTests => vec![
                config.git_command.clone(),
                "clone".to_string(),
                config.psa_arch_tests_repo.clone(),
                "-b".to_string(),
                config.psa_arch_tests_branch.clone(),
                ARCH_TESTS_DIR.to_string(),
            ],
            BuiltinStage::CloneMbedtlsTest => vec![
                config.git_command.clone(),
                "clone".to_string(),
                config.mbedtls_test_repo.clone(),
                "-b".to_string(),
                config.mbedtls_test_branch.clone(),
                MBEDTLS_TEST_DIR.to_string(),
            ],
            BuiltinStage::CleanCrypto => vec![
                config.make_command.clone(),
                "-C".to_string(),
                path_arg(layout.crypto_root()),
                "clean".to_string(),
            ],
            BuiltinStage::BuildCrypto => vec![
                config.make_command.clone(),
                "-C".to_string(),
                path_arg(layout.crypto_root()),
                "-j".to_string(),
            ],
            BuiltinStage::CompileTestMain => vec![
                config.gcc_command.clone(),
                "-Wall".to_string(),
                "-Werror".to_string(),
                "-c".to_string(),
                "-o".to_string(),
                path_arg(&layout.test_main_object),
                path_arg(&layout.test_main_source),
            ],
            BuiltinStage::ConfigureArchTests => vec![
                config.cmake_command.clone(),
                path_arg(&layout.api_tests_dir),
                format!("-G{}", config.cmake_generator),
                format!("-DTOOLCHAIN={}", config.toolchain),
                format!("-DTARGET={}", config.target),
                format!("-DSUITE={}", config.suite),
                format!("-DPSA_INCLUDE_PATHS={}", layout.include_dir.display()),
                format!("-DCPU_ARCH={}", config.cpu_arch),
            ],
            BuiltinStage::BuildArchTests => vec![
                config.cmake_command.clone(),
                "--build".to_string(),
                path_arg(&layout.build_dir),
            ],
            BuiltinStage::LinkArchTests => {
                let mut cmd = vec![
                    config.gcc_command.clone(),
                    "-o".to_string(),
                    path_arg(&layout.test_binary),
                    path_arg(&layout.test_main_object),
                ];
                cmd.extend(layout.suite_archives().iter().map(|p| path_arg(p)));
                cmd.push(path_arg(&layout.crypto_archive));
                cmd
            }
            BuiltinStage::RunArchTests => vec![path_arg(&layout.test_binary)],
        }
    }

    /// Directory the stage runs in.
    pub fn working_dir(&self, layout: &HarnessLayout) -> PathBuf {
        match self {
            BuiltinStage::CloneArchTests
            | BuiltinStage::CloneMbedtlsTest
            | BuiltinStage::CleanCrypto
            | BuiltinStage::BuildCrypto
            | BuiltinStage::CompileTestMain => layout.work_dir.clone(),
            BuiltinStage::ConfigureArchTests
            | BuiltinStage::BuildArchTests
            | BuiltinStage::LinkArchTests
            | BuiltinStage::RunArchTests => layout.build_dir.clone(),
        }
    }
}

/// Start directories are checked by `HarnessLayout::check_start_dir`, so
/// the lossy conversion never rewrites a path here.
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Configuration for a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Directory the command runs in.
    pub working_dir: PathBuf,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a stage configuration from a builtin stage.
    pub fn from_builtin(stage: BuiltinStage, config: &HarnessConfig, layout: &HarnessLayout) -> Self {
        Self {
            name: stage.name().to_string(),
            command: stage.command(config, layout),
            working_dir: stage.working_dir(layout),
            timeout_secs: config.step_timeout_secs,
        }
    }

    /// Create a custom stage configuration.
    pub fn custom(
        name: String,
        command: Vec<String>,
        working_dir: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            name,
            command,
            working_dir: working_dir.into(),
            timeout_secs,
        }
    }

    /// Program name, for logs.
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }
}
