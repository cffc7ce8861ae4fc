use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::errors::ExecError;

/// Final state of an executed case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Error => "error",
        }
    }
}

/// Outcome of one assertion, or of one test reported by an external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub name: String,
    pub passed: bool,
    pub expected: Value,
    pub actual: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Uniform result of running a case with any runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Always equal to `status == Status::Passed`.
    pub success: bool,
    pub status: Status,
    /// Wall-clock milliseconds.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<Vec<AssertionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

impl ExecutionResult {
    /// Construct a bare result. `success` is derived from `status`.
    pub fn new(status: Status, duration: Duration) -> Self {
        Self {
            success: status == Status::Passed,
            status,
            duration: duration.as_millis() as u64,
            message: None,
            error_message: None,
            error_stack: None,
            assertions: None,
            response_data: None,
            logs: None,
        }
    }

    /// `passed` if `ok`, `failed` otherwise.
    pub fn verdict(ok: bool, duration: Duration) -> Self {
        Self::new(if ok { Status::Passed } else { Status::Failed }, duration)
    }

    /// Fold an error into an `error` result. The first line of the error
    /// becomes the message and the full rendering the stack.
    pub fn error(err: &ExecError, duration: Duration) -> Self {
        let rendered = err.to_string();
        let message = rendered.lines().next().unwrap_or_default().to_string();
        let mut result = Self::new(Status::Error, duration);
        result.error_message = Some(message);
        result.error_stack = Some(format!("{:?}", err));
        result
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_assertions(mut self, assertions: Vec<AssertionResult>) -> Self {
        self.assertions = Some(assertions);
        self
    }

    pub fn with_response_data(mut self, data: Value) -> Self {
        self.response_data = Some(data);
        self
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Number of passed and failed assertions.
    pub fn tally(&self) -> (usize, usize) {
        self.assertions
            .iter()
            .flatten()
            .fold((0, 0), |(pass, fail), a| {
                if a.passed {
                    (pass + 1, fail)
                } else {
                    (pass, fail + 1)
                }
            })
    }
}

/// Counts accumulated while reading a tool report.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReportSummary {
    pub passed: usize,
    pub failed: usize,
    pub assertions: Vec<AssertionResult>,
    pub summary: Value,
}

impl ReportSummary {
    pub fn push(&mut self, result: AssertionResult) {
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.assertions.push(result);
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// Text of the form `Total: 3, Passed: 2, Failed: 1`.
    pub fn headline(&self) -> String {
        format!(
            "Total: {}, Passed: {}, Failed: {}",
            self.total(),
            self.passed,
            self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_tracks_status() {
        for status in [Status::Passed, Status::Failed, Status::Skipped, Status::Error] {
            let result = ExecutionResult::new(status, Duration::from_millis(5));
            assert_eq!(result.success, status == Status::Passed);
            assert_eq!(result.duration, 5);
        }
    }

    #[test]
    fn error_splits_message_and_stack() {
        let err = ExecError::Transport("connection refused\n  caused by: os error 111".into());
        let result = ExecutionResult::error(&err, Duration::ZERO);
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.error_message.as_deref(), Some("connection refused"));
        assert!(result.error_stack.unwrap().contains("os error 111"));
    }

    #[test]
    fn serializes_in_camel_case() {
        let result = ExecutionResult::verdict(true, Duration::from_millis(12))
            .with_response_data(json!({"ok": true}));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "passed");
        assert_eq!(value["responseData"]["ok"], true);
        assert!(value.get("errorMessage").is_none());
    }

    #[test]
    fn headline_counts() {
        let mut summary = ReportSummary::default();
        for passed in [true, true, false] {
            summary.push(AssertionResult {
                name: "t".into(),
                passed,
                expected: json!("pass"),
                actual: json!(if passed { "pass" } else { "boom" }),
                message: None,
            });
        }
        assert_eq!(summary.headline(), "Total: 3, Passed: 2, Failed: 1");
    }
}
