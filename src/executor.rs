//! Action executor: performs one action against the platform. Runs inside
//! the adapter process, synchronously, one action at a time.

use crate::backend::NativeBackend;
use crate::error::AgentError;
use crate::registry::ElementRegistry;
use crate::schema::AgentAction;
use crate::security::ShellOptions;
use crate::shell_analysis;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

pub struct ActionExecutor {
    shell_options: ShellOptions,
}

impl ActionExecutor {
    pub fn new(shell_options: ShellOptions) -> Self {
        Self { shell_options }
    }

    pub fn from_env() -> Self {
        Self::new(ShellOptions::from_env())
    }

    /// Execute one non-observation action. The policy gate runs on the
    /// orchestrator side; this layer still re-checks the shell structure
    /// gates because the adapter must hold even against a broken caller.
    pub fn execute(
        &self,
        action: &AgentAction,
        backend: &mut dyn NativeBackend,
        registry: &ElementRegistry,
    ) -> Result<Value, AgentError> {
        match action {
            AgentAction::UiClick { element_id } => {
                let handle = registry.resolve(element_id)?;
                if !backend.is_live(handle) {
                    return Err(AgentError::StaleReference(element_id.clone()));
                }
                // Semantic trigger only. If the platform rejects it, that is
                // the answer; escalation to coordinates is the control
                // loop's call, not ours.
                backend.press(handle)?;
                Ok(json!({ "clicked": element_id }))
            }
            AgentAction::MouseMove { x, y } => {
                backend.move_mouse(*x, *y)?;
                Ok(json!({ "moved": { "x": x, "y": y } }))
            }
            AgentAction::KeyboardType { text } => {
                backend.type_text(text)?;
                Ok(json!({ "typed_chars": text.chars().count() }))
            }
            AgentAction::ShellExec { command } => self.run_shell(command),
            AgentAction::FileDelete { path } => {
                let target = Path::new(path);
                if !target.is_file() {
                    return Err(AgentError::ExecutionFailed(format!(
                        "file.delete targets single files, '{path}' is not one"
                    )));
                }
                std::fs::remove_file(target)?;
                info!(path, "deleted file");
                Ok(json!({ "deleted": path }))
            }
            AgentAction::Terminate => Ok(json!({ "terminating": true })),
            AgentAction::UiSnapshot { .. } => Err(AgentError::ExecutionFailed(
                "ui.snapshot is handled by the observer".to_string(),
            )),
        }
    }

    fn run_shell(&self, command: &str) -> Result<Value, AgentError> {
        let analysis = shell_analysis::analyze_shell_command(command);
        if analysis.has_substitution && !self.shell_options.allow_substitution {
            return Err(AgentError::ExecutionFailed(
                "command substitution is blocked".to_string(),
            ));
        }
        if analysis.has_composites && !self.shell_options.allow_composites {
            return Err(AgentError::ExecutionFailed(
                "composite commands are blocked".to_string(),
            ));
        }

        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| AgentError::ExecutionFailed(format!("spawn failed: {e}")))?;

        if output.status.success() {
            Ok(json!({
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }))
        } else {
            Err(AgentError::ExecutionFailed(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
