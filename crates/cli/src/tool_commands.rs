use std::sync::Arc;

use {
    anyhow::{Context, Result},
    cubicle_config::CubicleConfig,
    cubicle_sandbox::Sandbox,
    cubicle_tools::{SessionSandbox, ToolRegistry, default_registry},
    serde_json::Value,
};

use crate::{Identity, sandbox_commands::tool_context};

fn registry(config: &CubicleConfig) -> Result<ToolRegistry> {
    let sandbox = Sandbox::new(config)?;
    let timeout = sandbox.sub_agent_timeout();
    let sandbox: Arc<dyn SessionSandbox> = Arc::new(sandbox);
    Ok(default_registry(sandbox, timeout))
}

fn parse_params(raw: &str) -> Result<Value> {
    let params: Value = serde_json::from_str(raw).context("--params is not valid JSON")?;
    anyhow::ensure!(params.is_object(), "--params must be a JSON object");
    Ok(params)
}

pub async fn run(config: &CubicleConfig, identity: &Identity, name: &str, params: &str) -> Result<()> {
    let params = parse_params(params)?;
    let output = registry(config)?
        .execute(name, &tool_context(identity), params)
        .await?;
    println!("{output}");
    Ok(())
}

pub fn list(config: &CubicleConfig) -> Result<()> {
    let schemas = registry(config)?.list_schemas();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
