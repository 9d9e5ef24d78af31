use std::{collections::HashMap, sync::Arc};

#[cfg(feature = "metrics")]
use std::time::Instant;

use {async_trait::async_trait, serde_json::Value, tracing::warn};

#[cfg(feature = "metrics")]
use cubicle_metrics::{counter, histogram, labels, tools as tools_metrics};

use crate::{
    context::ToolContext,
    error::{Error, Result},
};

/// A tool an agent can call against its session sandbox.
#[async_trait]
pub trait SandboxTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<String>;
}

/// Registry of the tools available to a caller.
///
/// Tools are stored as `Arc<dyn SandboxTool>` so the registry can be cheaply
/// cloned.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn SandboxTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn SandboxTool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::from(tool));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn SandboxTool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Schemas sorted by tool name.
    #[must_use]
    pub fn list_schemas(&self) -> Vec<Value> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a tool by name.
    ///
    /// Only an unknown tool name is an `Err`; failures inside the tool come
    /// back as `Error: ...` text so the calling agent can read them.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, params: Value) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let outcome = tool.execute(ctx, params).await;

        #[cfg(feature = "metrics")]
        {
            let tool_name = name.to_string();
            counter!(tools_metrics::EXECUTIONS_TOTAL, labels::TOOL => tool_name.clone())
                .increment(1);
            histogram!(tools_metrics::EXECUTION_DURATION_SECONDS, labels::TOOL => tool_name.clone())
                .record(start.elapsed().as_secs_f64());
            if outcome.is_err() {
                counter!(tools_metrics::EXECUTION_ERRORS_TOTAL, labels::TOOL => tool_name)
                    .increment(1);
            }
        }

        Ok(outcome.unwrap_or_else(|e| {
            warn!(tool = name, session = %ctx.session_id, error = %e, "tool failed");
            format!("Error: {e}")
        }))
    }
}
