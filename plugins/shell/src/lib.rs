mod sandbox;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use relay_shared::{
    relay_provider, ActionContext, ActionDescriptor, ActionProvider, CancellationToken, ParamSpec,
    ParamType, ProviderConfig, ProviderManifest, RelayError, RelayResult,
};

pub const RUN_COMMAND: &str = "run_command";

#[relay_provider(
    name = "tool.shell",
    description = "Executes shell commands in a sandboxed environment with a hard kill on timeout.",
    version = "0.1.0",
    config_keys = ["working_dir", "max_output_bytes", "allowed_commands"],
    tags = ["#TOOL", "#SHELL"]
)]
pub struct ShellProvider {
    working_dir: String,
    max_output_bytes: usize,
    command_allowlist: Option<Vec<String>>,
}

/// Safely truncate a UTF-8 string at a byte boundary.
fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn clip(output: &str, max: usize) -> String {
    if output.len() > max {
        format!(
            "{}...[truncated, {} bytes total]",
            safe_truncate(output, max),
            output.len()
        )
    } else {
        output.to_string()
    }
}

/// Resolves once the token is cancelled; polled because the flag is never pushed.
async fn cancelled(token: &CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        interval.tick().await;
        if token.is_cancelled() {
            return;
        }
    }
}

impl ShellProvider {
    pub async fn new_provider(config: ProviderConfig) -> anyhow::Result<Self> {
        let working_dir = config
            .config_values
            .get("working_dir")
            .cloned()
            .unwrap_or_else(|| "/tmp/relay-sandbox".to_string());
        let max_output_bytes = config
            .config_values
            .get("max_output_bytes")
            .and_then(|v| v.parse().ok())
            .unwrap_or(65536);
        let command_allowlist = config
            .config_values
            .get("allowed_commands")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect());

        Ok(Self {
            working_dir,
            max_output_bytes,
            command_allowlist,
        })
    }

    async fn run_command(&self, params: Value, ctx: ActionContext) -> RelayResult<Value> {
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidArgument("command must be a string".into()))?;
        let timeout_secs = params
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(30)
            .clamp(1, 120);

        sandbox::validate_command(command, &self.command_allowlist)
            .map_err(|e| RelayError::InvalidArgument(e.to_string()))?;

        ctx.checkpoint("cancelled before spawning subprocess")?;

        if let Err(e) = std::fs::create_dir_all(&self.working_dir) {
            tracing::warn!(dir = %self.working_dir, error = %e, "could not create working dir");
        }
        let working_dir = std::fs::canonicalize(&self.working_dir)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| self.working_dir.clone());

        tracing::info!(command = %command, "🖥️ Executing");

        // kill_on_drop ensures the child dies with the wait future on
        // timeout or cancellation.
        let child = tokio::process::Command::new("sh")
            .args(["-c", command])
            .current_dir(&working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::Execution(format!("failed to spawn command: {}", e)))?;

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            result = &mut wait => result,
            () = cancelled(&ctx.cancellation) => {
                return Err(RelayError::Cancelled(
                    "command cancelled; subprocess killed".to_string(),
                ));
            }
            () = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                return Err(RelayError::Timeout {
                    action: RUN_COMMAND.to_string(),
                    timeout_ms: timeout_secs * 1000,
                });
            }
        };

        let output =
            output.map_err(|e| RelayError::Execution(format!("command failed to run: {}", e)))?;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        ctx.reporter
            .running(1, 1, format!("command exited with code {}", exit_code))
            .await;

        Ok(json!({
            "exit_code": exit_code,
            "stdout": clip(&stdout, self.max_output_bytes),
            "stderr": clip(&stderr, self.max_output_bytes),
        }))
    }
}

#[async_trait]
impl ActionProvider for ShellProvider {
    fn manifest(&self) -> ProviderManifest {
        self.auto_manifest()
    }

    fn descriptors(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(
            RUN_COMMAND,
            "Execute a shell command and return stdout, stderr, and exit code.",
        )
        .with_param("command", ParamSpec::required(ParamType::String))
        .with_param("timeout_secs", ParamSpec::optional(ParamType::Integer, json!(30)))
        .returning("exit_code, stdout, stderr")]
    }

    async fn execute(
        &self,
        action: &str,
        params: Value,
        ctx: ActionContext,
    ) -> RelayResult<Value> {
        match action {
            RUN_COMMAND => self.run_command(params, ctx).await,
            other => Err(RelayError::ActionNotFound(other.to_string())),
        }
    }
}
