//! The seam between tools and the container sandbox.

use {
    async_trait::async_trait,
    cubicle_common::ExecutionResult,
    cubicle_sandbox::{ContainerHandle, Sandbox, SessionEnv, SessionId},
    tracing::debug,
};

use crate::{context::ToolContext, error::Result};

/// What tools need from a sandbox: resolve the caller's container and run
/// something in it.
#[async_trait]
pub trait SessionSandbox: Send + Sync {
    async fn exec_command(
        &self,
        ctx: &ToolContext,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult>;

    async fn exec_with_input(
        &self,
        ctx: &ToolContext,
        program: &[String],
        payload: &[u8],
    ) -> Result<ExecutionResult>;
}

/// Environment for the caller's container: config base plus caller identity.
#[must_use]
pub fn session_env(base: SessionEnv, ctx: &ToolContext) -> SessionEnv {
    base.gitlab_token(ctx.gitlab_token.as_ref())
        .user_name(ctx.user_name.as_deref())
        .user_email(ctx.user_email.as_deref())
}

async fn container_for(sandbox: &Sandbox, ctx: &ToolContext) -> Result<ContainerHandle> {
    let session = SessionId::parse(ctx.session_id.as_str())?;
    let env = session_env(sandbox.base_env(), ctx);
    let handle = sandbox.get_or_create_container(&session, &env).await?;
    debug!(session = %session, container = %handle.name, "resolved container");
    Ok(handle)
}

#[async_trait]
impl SessionSandbox for Sandbox {
    async fn exec_command(
        &self,
        ctx: &ToolContext,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        let handle = container_for(self, ctx).await?;
        Ok(Sandbox::exec_command(self, &handle, command, timeout_secs).await)
    }

    async fn exec_with_input(
        &self,
        ctx: &ToolContext,
        program: &[String],
        payload: &[u8],
    ) -> Result<ExecutionResult> {
        let handle = container_for(self, ctx).await?;
        Ok(Sandbox::exec_with_input(self, &handle, program, payload).await)
    }
}
