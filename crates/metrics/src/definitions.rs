//! Metric name and label definitions.
//!
//! Centralizing these keeps recording sites consistent and documents which
//! metrics the sandbox emits.

/// Command execution inside session containers
pub mod sandbox {
    /// Total number of commands run (buffered and streaming)
    pub const COMMAND_EXECUTIONS_TOTAL: &str = "cubicle_sandbox_command_executions_total";
    /// Command duration in seconds, measured on the host
    pub const COMMAND_DURATION_SECONDS: &str = "cubicle_sandbox_command_duration_seconds";
    /// Commands that failed before producing an exit code
    pub const COMMAND_ERRORS_TOTAL: &str = "cubicle_sandbox_command_errors_total";
    /// Commands stopped by the in-container timeout wrapper
    pub const COMMAND_TIMEOUTS_TOTAL: &str = "cubicle_sandbox_command_timeouts_total";
    /// Bytes written to exec stdin on the streaming path
    pub const STDIN_BYTES_TOTAL: &str = "cubicle_sandbox_stdin_bytes_total";
}

/// Session container lifecycle
pub mod containers {
    /// Containers created for new sessions
    pub const CREATED_TOTAL: &str = "cubicle_containers_created_total";
    /// Stopped containers started again
    pub const STARTED_TOTAL: &str = "cubicle_containers_started_total";
    /// Existing running containers reused as-is
    pub const REUSED_TOTAL: &str = "cubicle_containers_reused_total";
    /// Host directory preparation failures (best-effort step)
    pub const PREPARE_FAILURES_TOTAL: &str = "cubicle_containers_prepare_failures_total";
}

/// Container engine connection
pub mod connection {
    /// Reconnect attempts, successful or not
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "cubicle_connection_reconnect_attempts_total";
    /// Reconnects that exhausted the retry budget
    pub const RECONNECT_FAILURES_TOTAL: &str = "cubicle_connection_reconnect_failures_total";
    /// Operations retried after a transient transport error
    pub const RETRIES_TOTAL: &str = "cubicle_connection_retries_total";
}

/// Computer-use tools
pub mod tools {
    /// Total tool invocations
    pub const EXECUTIONS_TOTAL: &str = "cubicle_tool_executions_total";
    /// Tool invocations that returned an error
    pub const EXECUTION_ERRORS_TOTAL: &str = "cubicle_tool_execution_errors_total";
    /// Tool duration in seconds
    pub const EXECUTION_DURATION_SECONDS: &str = "cubicle_tool_execution_duration_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const MODE: &str = "mode";
    pub const TOOL: &str = "tool";
    pub const TRANSPORT: &str = "transport";
    pub const OUTCOME: &str = "outcome";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefixed_and_unique() {
        let names = [
            sandbox::COMMAND_EXECUTIONS_TOTAL,
            sandbox::COMMAND_DURATION_SECONDS,
            sandbox::COMMAND_ERRORS_TOTAL,
            sandbox::COMMAND_TIMEOUTS_TOTAL,
            sandbox::STDIN_BYTES_TOTAL,
            containers::CREATED_TOTAL,
            containers::STARTED_TOTAL,
            containers::REUSED_TOTAL,
            containers::PREPARE_FAILURES_TOTAL,
            connection::RECONNECT_ATTEMPTS_TOTAL,
            connection::RECONNECT_FAILURES_TOTAL,
            connection::RETRIES_TOTAL,
            tools::EXECUTIONS_TOTAL,
            tools::EXECUTION_ERRORS_TOTAL,
            tools::EXECUTION_DURATION_SECONDS,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.starts_with("cubicle_")));
    }
}
