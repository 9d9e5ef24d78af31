use serde::{Deserialize, Serialize};

/// Exit code reported when the in-container `timeout` wrapper fired.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Outcome of one command run inside a sandbox.
///
/// Failures are data: a transport error becomes `exit_code == -1` with the
/// error text in `output`, so callers always get something they can show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i64,
    pub output: String,
    pub success: bool,
}

impl ExecutionResult {
    #[must_use]
    pub fn new(exit_code: i64, output: String) -> Self {
        Self {
            exit_code,
            output,
            success: exit_code == 0,
        }
    }

    /// A result for work that never reached the container.
    #[must_use]
    pub fn failed(output: impl Into<String>) -> Self {
        Self::new(-1, output.into())
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// Text to hand back to an agent: the output, or the bare exit code when
    /// the command printed nothing.
    #[must_use]
    pub fn into_display(self) -> String {
        if self.output.is_empty() {
            format!("[Exit code: {}]", self.exit_code)
        } else {
            self.output
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(0, true)]
    #[case(1, false)]
    #[case(124, false)]
    #[case(-1, false)]
    fn success_tracks_exit_code(#[case] code: i64, #[case] success: bool) {
        assert_eq!(ExecutionResult::new(code, String::new()).success, success);
    }

    #[test]
    fn failed_uses_negative_exit_code() {
        let res = ExecutionResult::failed("Execution error: boom");
        assert_eq!(res.exit_code, -1);
        assert!(!res.success);
        assert_eq!(res.output, "Execution error: boom");
    }

    #[test]
    fn empty_output_displays_exit_code() {
        assert_eq!(
            ExecutionResult::new(3, String::new()).into_display(),
            "[Exit code: 3]"
        );
        assert_eq!(ExecutionResult::new(0, "hi".into()).into_display(), "hi");
    }

    #[test]
    fn serializes_flat() {
        let json = serde_json::to_value(ExecutionResult::new(124, "x".into())).unwrap();
        assert_eq!(json["exit_code"], 124);
        assert_eq!(json["success"], false);
    }
}
