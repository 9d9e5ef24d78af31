use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
    tracing::debug,
};

use crate::{
    backend::SessionSandbox,
    context::ToolContext,
    error::{Result, parse_params},
    registry::SandboxTool,
};

#[derive(Debug, Deserialize)]
struct BashParams {
    command: String,
    #[serde(default)]
    description: String,
}

/// Runs a shell command in the caller's container.
pub struct BashTool {
    sandbox: Arc<dyn SessionSandbox>,
}

impl BashTool {
    #[must_use]
    pub fn new(sandbox: Arc<dyn SessionSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl SandboxTool for BashTool {
    fn name(&self) -> &str {
        "bash_tool"
    }

    fn description(&self) -> &str {
        "Run a bash command in the container. Returns combined stdout and stderr."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Bash command to run in container"
                },
                "description": {
                    "type": "string",
                    "description": "Why I'm running this command"
                }
            },
            "required": ["command", "description"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<String> {
        let params: BashParams = parse_params(params)?;
        debug!(session = %ctx.session_id, why = %params.description, "bash_tool");
        let result = self
            .sandbox
            .exec_command(ctx, &params.command, None)
            .await?;
        Ok(result.into_display())
    }
}
