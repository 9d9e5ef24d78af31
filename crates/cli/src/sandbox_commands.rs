use {
    anyhow::{Result, bail},
    cubicle_config::CubicleConfig,
    cubicle_sandbox::{ContainerHandle, Sandbox, SessionId},
    cubicle_tools::{ToolContext, session_env},
};

use crate::Identity;

pub(crate) fn tool_context(identity: &Identity) -> ToolContext {
    ToolContext::new(identity.session.clone())
        .with_user(identity.user_name.clone(), identity.user_email.clone())
        .with_gitlab_token(identity.gitlab_token.clone())
}

async fn container(sandbox: &Sandbox, identity: &Identity) -> Result<ContainerHandle> {
    let session = SessionId::parse(identity.session.as_str())?;
    let env = session_env(sandbox.base_env(), &tool_context(identity));
    Ok(sandbox.get_or_create_container(&session, &env).await?)
}

/// Process exit status for a command's exit code. Codes outside `0..=255`
/// (including the `-1` used for failures that never reached the container)
/// become 1.
fn exit_status(code: i64) -> i32 {
    u8::try_from(code).map(i32::from).unwrap_or(1)
}

pub async fn ping(config: &CubicleConfig) -> Result<()> {
    let sandbox = Sandbox::new(config)?;
    if !sandbox.ping().await {
        bail!("container engine is not reachable");
    }
    println!("ok");
    Ok(())
}

pub async fn ensure(config: &CubicleConfig, identity: &Identity) -> Result<()> {
    let sandbox = Sandbox::new(config)?;
    let handle = container(&sandbox, identity).await?;
    println!("{}\t{}", handle.name, handle.id);
    Ok(())
}

/// Run `command` and return the exit status the process should end with.
pub async fn exec(
    config: &CubicleConfig,
    identity: &Identity,
    timeout: Option<u64>,
    command: &[String],
) -> Result<i32> {
    let sandbox = Sandbox::new(config)?;
    let handle = container(&sandbox, identity).await?;
    let result = sandbox
        .exec_command(&handle, &command.join(" "), timeout)
        .await;
    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    Ok(exit_status(result.exit_code))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(0, 0)]
    #[case(2, 2)]
    #[case(124, 124)]
    #[case(255, 255)]
    #[case(-1, 1)]
    #[case(300, 1)]
    fn exit_status_mirrors_command(#[case] code: i64, #[case] expected: i32) {
        assert_eq!(exit_status(code), expected);
    }

    #[test]
    fn context_carries_identity() {
        let ctx = tool_context(&Identity {
            session: "chat-1".into(),
            user_name: Some("Ada".into()),
            user_email: Some(String::new()),
            gitlab_token: None,
        });
        assert_eq!(ctx.session_id, "chat-1");
        assert_eq!(ctx.user_name.as_deref(), Some("Ada"));
        assert!(ctx.user_email.is_none());
    }
}
