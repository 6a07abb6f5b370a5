//! Command provider - applies a module by running its `command`
//!
//! The command runs through `sh -c` with:
//! - the `ApplyRequest` as JSON on stdin
//! - `FOUNDRY_MODULE`, `FOUNDRY_ENVIRONMENT`, `FOUNDRY_REGION` in the environment
//!
//! Stdout must be a JSON object; its entries become the module outputs.
//! Modules without a command produce no outputs (logged as a warning).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use super::{ApplyRequest, ModuleOutputs, ModuleProvider};

/// Default time limit for one module command
const APPLY_TIMEOUT: Duration = Duration::from_secs(600);

/// Provider running shell commands
#[derive(Debug, Clone)]
pub struct CommandProvider {
    shell: String,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: APPLY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn parse_outputs(module: &str, stdout: &[u8]) -> Result<ModuleOutputs> {
        let text = String::from_utf8_lossy(stdout);
        let text = text.trim();
        if text.is_empty() {
            return Ok(ModuleOutputs::new());
        }

        match serde_json::from_str::<Value>(text)
            .with_context(|| format!("module '{}' printed invalid JSON", module))?
        {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => bail!(
                "module '{}' must print a JSON object, got {}",
                module,
                json_kind(&other)
            ),
        }
    }
}

impl Default for CommandProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl ModuleProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    async fn apply_module(&self, request: &ApplyRequest) -> Result<ModuleOutputs> {
        let Some(command) = request.command.as_deref() else {
            warn!(module = %request.module, "module has no command, nothing to apply");
            return Ok(ModuleOutputs::new());
        };
        let body = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .env("FOUNDRY_MODULE", &request.module)
            .env("FOUNDRY_ENVIRONMENT", request.params.environment.as_str())
            .env("FOUNDRY_REGION", request.params.region.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn command for '{}'", request.module))?;

        // Feed stdin while draining stdout, both under the time limit
        let stdin = child.stdin.take();
        let run = async move {
            let write = async move {
                if let Some(mut stdin) = stdin {
                    // A command that ignores stdin may close it early
                    if let Err(e) = stdin.write_all(&body).await {
                        if e.kind() != std::io::ErrorKind::BrokenPipe {
                            return Err(e);
                        }
                    }
                }
                Ok(())
            };
            let (written, output) = tokio::join!(write, child.wait_with_output());
            written?;
            output
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                anyhow!(
                    "command for '{}' timed out after {:?}",
                    request.module,
                    self.timeout
                )
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "command exited with {}: {}",
                output.status.code().map_or("signal".to_string(), |c| c.to_string()),
                stderr.trim()
            );
        }

        Self::parse_outputs(&request.module, &output.stdout)
    }
}
