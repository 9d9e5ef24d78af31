//! Running commands inside a session container.
//!
//! Two paths share the same result shape: a buffered exec for ordinary shell
//! commands, and an attached exec that streams a payload through stdin for
//! content too large or too awkward to pass as arguments.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    cubicle_common::{ExecutionResult, TIMEOUT_EXIT_CODE},
    cubicle_config::{ContainerConfig, ExecConfig},
    futures::StreamExt,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use cubicle_metrics::{counter, histogram, labels, sandbox as sandbox_metrics};

use crate::{
    connection::ConnectionManager,
    engine::{ContainerEngine, ExecOutput, ExecSpec},
    error::{EngineError, EngineResult, Error},
    idle::IdleCoordinator,
    lifecycle::ContainerHandle,
};

/// `timeout -k` escalated to SIGKILL.
const KILLED_EXIT_CODE: i64 = 137;

/// How long to wait for the engine to publish an exit code after output ends.
const EXIT_POLL_ATTEMPTS: u32 = 20;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Render an engine-side failure the way callers expect to see it.
#[must_use]
pub fn failure_result(err: &Error) -> ExecutionResult {
    match err {
        Error::NotConnected => ExecutionResult::failed(Error::NotConnected.to_string()),
        other => ExecutionResult::failed(format!("Execution error: {other}")),
    }
}

/// Stdout then stderr, decoded lossily, newline-joined when both are present.
#[must_use]
pub fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let out = String::from_utf8_lossy(stdout);
    let err = String::from_utf8_lossy(stderr);
    match (out.is_empty(), err.is_empty()) {
        (false, false) => format!("{out}\n{err}"),
        (false, true) => out.into_owned(),
        (true, _) => err.into_owned(),
    }
}

#[must_use]
pub fn timeout_marker(timeout_secs: u64) -> String {
    format!("\n[Command timed out after {timeout_secs} seconds]")
}

/// Timing and identity for exec calls.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub command_timeout_secs: u64,
    pub kill_grace_secs: u64,
    pub user: Option<String>,
    pub working_dir: String,
}

impl ExecSettings {
    #[must_use]
    pub fn new(exec: &ExecConfig, container: &ContainerConfig) -> Self {
        Self {
            command_timeout_secs: exec.command_timeout_secs,
            kill_grace_secs: exec.kill_grace_secs,
            user: container.exec_user().map(str::to_string),
            working_dir: container.working_dir.clone(),
        }
    }

    fn timeout_prefix(&self, timeout_secs: u64) -> Vec<String> {
        vec![
            "timeout".into(),
            "-k".into(),
            self.kill_grace_secs.to_string(),
            timeout_secs.to_string(),
        ]
    }
}

pub struct ExecutionBridge {
    conn: Arc<ConnectionManager>,
    settings: ExecSettings,
    idle: IdleCoordinator,
}

impl ExecutionBridge {
    #[must_use]
    pub fn new(conn: Arc<ConnectionManager>, settings: ExecSettings, idle: IdleCoordinator) -> Self {
        Self {
            conn,
            settings,
            idle,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    fn spec(&self, cmd: Vec<String>, attach_stdin: bool) -> ExecSpec {
        ExecSpec {
            cmd,
            user: self.settings.user.clone(),
            working_dir: Some(self.settings.working_dir.clone()),
            attach_stdin,
        }
    }

    /// Run a shell command under a hard timeout and collect its output.
    pub async fn exec_command(
        &self,
        container: &ContainerHandle,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> ExecutionResult {
        let timeout_secs = timeout_secs.unwrap_or(self.settings.command_timeout_secs);
        self.idle.reset(container).await;

        let quoted = match shlex::try_quote(command) {
            Ok(q) => q.into_owned(),
            Err(e) => return ExecutionResult::failed(format!("Execution error: {e}")),
        };
        let wrapped = format!(
            "{} bash -c {quoted}",
            self.settings.timeout_prefix(timeout_secs).join(" ")
        );
        let spec = self.spec(vec!["bash".into(), "-c".into(), wrapped], false);

        debug!(container = %container.name, timeout_secs, "exec command");
        let started = Instant::now();
        let run = self
            .conn
            .execute_with_retry(|engine| {
                let spec = spec.clone();
                let id = container.id.clone();
                async move {
                    let exec_id = engine.create_exec(&id, &spec).await?;
                    let output = engine.start_exec(&exec_id).await?;
                    let exit_code = wait_exit_code(engine.as_ref(), &exec_id).await?;
                    Ok((output, exit_code))
                }
            })
            .await;

        let result = match run {
            Ok((output, exit_code)) => finish(output, exit_code, started.elapsed(), timeout_secs),
            Err(e) => {
                warn!(container = %container.name, error = %e, "exec failed");
                failure_result(&e)
            },
        };
        self.record("buffered", started, &result);
        result
    }

    /// Run `program` with `payload` written to its stdin, reading output
    /// concurrently so neither side can stall the other.
    pub async fn exec_with_input(
        &self,
        container: &ContainerHandle,
        program: &[String],
        payload: &[u8],
    ) -> ExecutionResult {
        let timeout_secs = self.settings.command_timeout_secs;
        self.idle.reset(container).await;

        let mut cmd = self.settings.timeout_prefix(timeout_secs);
        cmd.extend(program.iter().cloned());
        let spec = self.spec(cmd, true);

        debug!(
            container = %container.name,
            program = ?program.first(),
            payload_bytes = payload.len(),
            "exec with input"
        );
        #[cfg(feature = "metrics")]
        counter!(sandbox_metrics::STDIN_BYTES_TOTAL).increment(payload.len() as u64);

        let started = Instant::now();
        let attached = self
            .conn
            .execute_with_retry(|engine| {
                let spec = spec.clone();
                let id = container.id.clone();
                async move {
                    let exec_id = engine.create_exec(&id, &spec).await?;
                    let attached = engine.start_exec_attached(&exec_id).await?;
                    Ok((engine, exec_id, attached))
                }
            })
            .await;
        let (engine, exec_id, attached) = match attached {
            Ok(parts) => parts,
            Err(e) => {
                warn!(container = %container.name, error = %e, "exec with input failed to start");
                let result = failure_result(&e);
                self.record("streaming", started, &result);
                return result;
            },
        };

        let mut input = attached.input;
        let mut stream = attached.output;
        let write = async {
            input.write_all(payload).await?;
            input.close_write_side().await
        };
        let read = async {
            let mut collected = ExecOutput::default();
            while let Some(chunk) = stream.next().await {
                collected.push(chunk?);
            }
            Ok::<_, EngineError>(collected)
        };
        let (written, read) = tokio::join!(write, read);

        // The process may exit without consuming all input; its output
        // still counts.
        if let Err(e) = written {
            warn!(container = %container.name, error = %e, "writing exec input failed");
        }

        let result = match read {
            Ok(output) => match wait_exit_code(engine.as_ref(), &exec_id).await {
                Ok(exit_code) => finish(output, exit_code, started.elapsed(), timeout_secs),
                Err(e) => failure_result(&Error::from(e)),
            },
            Err(e) => {
                warn!(container = %container.name, error = %e, "reading exec output failed");
                failure_result(&Error::from(e))
            },
        };
        self.record("streaming", started, &result);
        result
    }

    fn record(&self, mode: &'static str, started: Instant, result: &ExecutionResult) {
        let elapsed = started.elapsed();
        if result.timed_out() {
            info!(mode, elapsed_ms = elapsed.as_millis() as u64, "command timed out");
        }
        #[cfg(feature = "metrics")]
        {
            counter!(sandbox_metrics::COMMAND_EXECUTIONS_TOTAL, labels::MODE => mode).increment(1);
            histogram!(sandbox_metrics::COMMAND_DURATION_SECONDS, labels::MODE => mode)
                .record(elapsed.as_secs_f64());
            if result.exit_code == -1 {
                counter!(sandbox_metrics::COMMAND_ERRORS_TOTAL, labels::MODE => mode).increment(1);
            }
            if result.timed_out() {
                counter!(sandbox_metrics::COMMAND_TIMEOUTS_TOTAL, labels::MODE => mode)
                    .increment(1);
            }
        }
    }
}

/// Poll for the exit code; the engine can lag slightly behind the end of
/// output.
async fn wait_exit_code(engine: &dyn ContainerEngine, exec_id: &str) -> EngineResult<i64> {
    for _ in 0..EXIT_POLL_ATTEMPTS {
        if let Some(code) = engine.inspect_exec(exec_id).await? {
            return Ok(code);
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    Err(EngineError::Fatal(format!(
        "exec {exec_id} did not report an exit code"
    )))
}

fn finish(output: ExecOutput, exit_code: i64, elapsed: Duration, timeout_secs: u64) -> ExecutionResult {
    let mut text = combine_output(&output.stdout, &output.stderr);
    let timed_out = exit_code == TIMEOUT_EXIT_CODE
        || (exit_code == KILLED_EXIT_CODE && elapsed >= Duration::from_secs(timeout_secs));
    if timed_out {
        text.push_str(&timeout_marker(timeout_secs));
        return ExecutionResult::new(TIMEOUT_EXIT_CODE, text);
    }
    ExecutionResult::new(exit_code, text)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(b"out", b"err", "out\nerr")]
    #[case(b"out", b"", "out")]
    #[case(b"", b"err", "err")]
    #[case(b"", b"", "")]
    #[case(b"a\xffb", b"", "a\u{fffd}b")]
    fn combines_stdout_then_stderr(#[case] out: &[u8], #[case] err: &[u8], #[case] expected: &str) {
        assert_eq!(combine_output(out, err), expected);
    }

    #[test]
    fn timeout_exit_gets_marker() {
        let out = ExecOutput {
            stdout: b"partial".to_vec(),
            stderr: vec![],
        };
        let result = finish(out, 124, Duration::from_secs(2), 2);
        assert_eq!(result.exit_code, 124);
        assert!(!result.success);
        assert_eq!(result.output, "partial\n[Command timed out after 2 seconds]");
    }

    #[rstest]
    #[case(Duration::from_secs(3), 124)]
    #[case(Duration::from_millis(10), 137)]
    fn killed_counts_as_timeout_only_after_limit(#[case] elapsed: Duration, #[case] expected: i64) {
        let result = finish(ExecOutput::default(), 137, elapsed, 2);
        assert_eq!(result.exit_code, expected);
    }

    #[test]
    fn error_rendering() {
        assert_eq!(
            failure_result(&Error::NotConnected).output,
            "Connection to container engine failed"
        );
        let failed = failure_result(&EngineError::Fatal("boom".into()).into());
        assert_eq!(failed.exit_code, -1);
        assert_eq!(failed.output, "Execution error: boom");
    }
}
