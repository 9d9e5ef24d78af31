//! Self-expiring idle shutdown, run entirely inside the container.
//!
//! Before every command the previous timer process is killed and a new one
//! is started. The timer records its pid in [`MARKER_FILE`], sleeps for the
//! idle period and then signals pid 1, which stops the container. Nothing on
//! the host has to remember anything.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    connection::ConnectionManager,
    engine::ExecSpec,
    error::{Error, Result},
    lifecycle::ContainerHandle,
};

/// In-container file holding the active timer's pid.
pub const MARKER_FILE: &str = "/tmp/.shutdown-timer-pid";

/// Kill the recorded timer and its children. Always exits 0.
#[must_use]
pub fn kill_script() -> String {
    format!(
        "PID=$(cat {MARKER_FILE} 2>/dev/null); [ -n \"$PID\" ] && pkill -P $PID 2>/dev/null; kill $PID 2>/dev/null; true"
    )
}

/// Host-side bound on the kill step.
const KILL_TIMEOUT: Duration = Duration::from_secs(10);

#[must_use]
pub fn timer_script(idle_timeout_secs: u64) -> String {
    format!("echo $$ > {MARKER_FILE} && sleep {idle_timeout_secs} && kill 1")
}

pub struct IdleCoordinator {
    conn: Arc<ConnectionManager>,
    idle_timeout_secs: u64,
    user: Option<String>,
}

impl IdleCoordinator {
    #[must_use]
    pub fn new(conn: Arc<ConnectionManager>, idle_timeout_secs: u64, user: Option<String>) -> Self {
        Self {
            conn,
            idle_timeout_secs,
            user,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.idle_timeout_secs > 0
    }

    fn spec(&self, script: String) -> ExecSpec {
        ExecSpec {
            cmd: vec!["bash".into(), "-c".into(), script],
            user: self.user.clone(),
            ..Default::default()
        }
    }

    /// Restart the idle timer. Best-effort: failures are logged, never
    /// returned.
    pub async fn reset(&self, container: &ContainerHandle) {
        if !self.enabled() {
            return;
        }

        match tokio::time::timeout(KILL_TIMEOUT, self.kill_previous(container)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(container = %container.name, error = %e, "failed to cancel previous idle timer");
            },
            Err(_) => {
                warn!(container = %container.name, "cancelling previous idle timer timed out");
            },
        }

        match self.start_timer(container).await {
            Ok(()) => debug!(
                container = %container.name,
                idle_timeout_secs = self.idle_timeout_secs,
                "idle timer reset"
            ),
            Err(e) => {
                warn!(container = %container.name, error = %e, "failed to start idle timer");
            },
        }
    }

    async fn kill_previous(&self, container: &ContainerHandle) -> Result<()> {
        let spec = self.spec(kill_script());
        let exec_id = self
            .conn
            .execute_with_retry(|engine| {
                let spec = spec.clone();
                let id = container.id.clone();
                async move { engine.create_exec(&id, &spec).await }
            })
            .await?;
        let engine = self.conn.current().await.ok_or(Error::NotConnected)?;
        engine.start_exec(&exec_id).await?;
        Ok(())
    }

    async fn start_timer(&self, container: &ContainerHandle) -> Result<()> {
        let spec = self.spec(timer_script(self.idle_timeout_secs));
        let exec_id = self
            .conn
            .execute_with_retry(|engine| {
                let spec = spec.clone();
                let id = container.id.clone();
                async move { engine.create_exec(&id, &spec).await }
            })
            .await?;
        let engine = self.conn.current().await.ok_or(Error::NotConnected)?;
        engine.start_exec_detached(&exec_id).await?;
        Ok(())
    }
}
