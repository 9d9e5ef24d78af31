//! Per-session container sandboxes.
//!
//! A [`Sandbox`] maps a session id to a long-lived container, runs commands
//! in it, and lets the container stop itself after a period of inactivity.
//! All engine traffic goes through one [`ConnectionManager`].

pub mod connection;
pub mod docker;
pub mod engine;
pub mod env;
pub mod error;
pub mod exec;
pub mod idle;
pub mod lifecycle;
pub mod session;
pub mod transport;

#[cfg(test)]
mod fake;

use std::{sync::Arc, time::Duration};

use {
    cubicle_config::{CubicleConfig, EnvConfig},
    tracing::warn,
};

pub use {
    cubicle_common::ExecutionResult,
    connection::{ConnectionManager, Connector, RetryPolicy},
    docker::{DockerConnector, DockerEngine},
    engine::{ContainerEngine, ContainerState},
    env::SessionEnv,
    error::{EngineError, Error, Result},
    exec::{ExecSettings, ExecutionBridge, combine_output, failure_result},
    idle::IdleCoordinator,
    lifecycle::{ContainerHandle, ContainerSettings, LifecycleManager},
    session::SessionId,
    transport::Transport,
};

/// The three upward operations, wired to one engine connection.
pub struct Sandbox {
    conn: Arc<ConnectionManager>,
    lifecycle: LifecycleManager,
    bridge: ExecutionBridge,
    env: EnvConfig,
    sub_agent_timeout: Duration,
}

impl Sandbox {
    /// Build a sandbox that talks to Docker as configured. No connection is
    /// made until first use.
    pub fn new(config: &CubicleConfig) -> Result<Self> {
        let connector = Arc::new(DockerConnector::new(config.engine.clone()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: &CubicleConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let conn = Arc::new(ConnectionManager::new(
            connector,
            RetryPolicy::from(&config.engine.retry),
        ));
        let settings = ContainerSettings::try_from(&config.container)?;
        let exec_settings = ExecSettings::new(&config.exec, &config.container);
        let idle = IdleCoordinator::new(
            Arc::clone(&conn),
            config.exec.idle_timeout_secs,
            exec_settings.user.clone(),
        );
        Ok(Self {
            lifecycle: LifecycleManager::new(Arc::clone(&conn), settings),
            bridge: ExecutionBridge::new(Arc::clone(&conn), exec_settings, idle),
            conn,
            env: config.env.clone(),
            sub_agent_timeout: Duration::from_secs(config.exec.sub_agent_timeout_secs),
        })
    }

    /// Whether the engine answers, connecting first if needed.
    pub async fn ping(&self) -> bool {
        self.conn.ensure_connection().await
    }

    /// Base environment from config; callers layer per-request values on
    /// top before calling [`Sandbox::get_or_create_container`].
    #[must_use]
    pub fn base_env(&self) -> SessionEnv {
        SessionEnv::from_config(&self.env)
    }

    #[must_use]
    pub fn sub_agent_timeout(&self) -> Duration {
        self.sub_agent_timeout
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.settings().command_timeout_secs)
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub async fn get_or_create_container(
        &self,
        session: &SessionId,
        env: &SessionEnv,
    ) -> Result<ContainerHandle> {
        self.lifecycle.get_or_create(session, env).await.inspect_err(|e| {
            warn!(session = %session, error = %e, "could not provide container");
        })
    }

    pub async fn exec_command(
        &self,
        container: &ContainerHandle,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> ExecutionResult {
        self.bridge
            .exec_command(container, command, timeout_secs)
            .await
    }

    pub async fn exec_with_input(
        &self,
        container: &ContainerHandle,
        program: &[String],
        payload: &[u8],
    ) -> ExecutionResult {
        self.bridge
            .exec_with_input(container, program, payload)
            .await
    }
}
