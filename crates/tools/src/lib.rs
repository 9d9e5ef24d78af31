//! Computer-use tools that run inside a per-session sandbox container.
//!
//! Each tool is a [`SandboxTool`] registered in a [`ToolRegistry`]. Tools
//! never talk to the container engine directly; they go through
//! [`SessionSandbox`], which [`cubicle_sandbox::Sandbox`] implements.

use std::{sync::Arc, time::Duration};

pub mod backend;
pub mod bash;
pub mod context;
pub mod error;
pub mod files;
pub mod registry;
pub mod sub_agent;
pub mod view;

#[cfg(test)]
mod testing;

pub use {
    backend::{SessionSandbox, session_env},
    bash::BashTool,
    context::ToolContext,
    error::{Error, Result},
    files::{CreateFileTool, StrReplaceTool},
    registry::{SandboxTool, ToolRegistry},
    sub_agent::SubAgentTool,
    view::ViewTool,
};

/// Registry with every computer-use tool bound to `sandbox`.
pub fn default_registry(
    sandbox: Arc<dyn SessionSandbox>,
    sub_agent_timeout: Duration,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(BashTool::new(Arc::clone(&sandbox))));
    registry.register(Box::new(ViewTool::new(Arc::clone(&sandbox))));
    registry.register(Box::new(CreateFileTool::new(Arc::clone(&sandbox))));
    registry.register(Box::new(StrReplaceTool::new(Arc::clone(&sandbox))));
    registry.register(Box::new(SubAgentTool::new(sandbox, sub_agent_timeout)));
    registry
}
