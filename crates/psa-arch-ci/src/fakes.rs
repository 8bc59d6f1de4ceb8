//! In-process executor fake (testing only)
//!
//! `ScriptedExecutor` satisfies the [`CommandExecutor`] contract without
//! spawning anything: each stage gets a scripted exit code or error, and
//! optional side effects stand in for what the real tool would leave on disk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{HarnessError, HarnessResult};
use crate::runner::{CommandExecutor, StageResult};
use crate::stage::StageConfig;

type SideEffect = Box<dyn Fn(&StageConfig) + Send + Sync>;

/// Executor that answers from a script and records every call.
#[derive(Default)]
pub struct ScriptedExecutor {
    exit_codes: HashMap<String, i32>,
    errors: HashMap<String, String>,
    effects: HashMap<String, SideEffect>,
    calls: Mutex<Vec<StageConfig>>,
}

impl ScriptedExecutor {
    /// Every stage exits 0 unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `stage` exit with `code`.
    pub fn with_exit_code(mut self, stage: &str, code: i32) -> Self {
        self.exit_codes.insert(stage.to_string(), code);
        self
    }

    /// Make `stage` fail as if the program could not be started.
    pub fn with_error(mut self, stage: &str, message: &str) -> Self {
        self.errors.insert(stage.to_string(), message.to_string());
        self
    }

    /// Run `effect` whenever `stage` executes, before it reports back.
    pub fn on_stage(
        mut self,
        stage: &str,
        effect: impl Fn(&StageConfig) + Send + Sync + 'static,
    ) -> Self {
        self.effects.insert(stage.to_string(), Box::new(effect));
        self
    }

    /// Stages executed so far, in order.
    pub fn calls(&self) -> Vec<StageConfig> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of the stages executed so far, in order.
    pub fn call_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, config: &StageConfig) -> HarnessResult<StageResult> {
        self.calls.lock().unwrap().push(config.clone());

        if let Some(message) = self.errors.get(&config.name) {
            return Err(HarnessError::Spawn {
                program: config.program().to_string(),
                cwd: config.working_dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, message.clone()),
            });
        }

        if let Some(effect) = self.effects.get(&config.name) {
            effect(config);
        }

        let exit_code = self.exit_codes.get(&config.name).copied().unwrap_or(0);
        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout: format!("{} ok", config.program()),
            stderr: String::new(),
            duration_ms: 0,
            success: exit_code == 0,
        })
    }
}
