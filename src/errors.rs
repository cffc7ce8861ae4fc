use std::{error, fmt, io, time::Duration};

/// An error from caserun.
///
/// Runners never hand these to their callers: every variant is folded into
/// an [ExecutionResult](crate::executor::results::ExecutionResult) with
/// `status=error`. They are still useful as values inside a runner so that
/// `?` works on the way to that fold.
pub enum ExecError {
    /// The case (or the caserun configuration) is malformed or references
    /// something that does not exist.
    Config(String),
    /// The runner's external dependency is not installed.
    Unavailable(String),
    /// The HTTP request could not be completed.
    Transport(String),
    /// An operation did not finish in time.
    Timeout(Duration),
    /// An external process could not be spawned or waited on.
    Process(String),
    /// A report written by an external tool could not be understood.
    ReportParse(String),
    /// Filesystem error.
    Io(String),
}

impl ExecError {
    /// Short name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::Config(_) => "ConfigError",
            ExecError::Unavailable(_) => "AvailabilityError",
            ExecError::Transport(_) => "TransportError",
            ExecError::Timeout(_) => "Timeout",
            ExecError::Process(_) => "ProcessError",
            ExecError::ReportParse(_) => "ReportParseError",
            ExecError::Io(_) => "IoError",
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::Timeout(after) => {
                write!(f, "Request timed out after {}ms", after.as_millis())
            }
            ExecError::Config(msg)
            | ExecError::Unavailable(msg)
            | ExecError::Transport(msg)
            | ExecError::Process(msg)
            | ExecError::ReportParse(msg)
            | ExecError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Debug for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self)
    }
}

impl error::Error for ExecError {}

impl From<io::Error> for ExecError {
    fn from(err: io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        ExecError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for ExecError {
    fn from(err: toml::de::Error) -> Self {
        ExecError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ExecError {
    fn from(err: reqwest::Error) -> Self {
        ExecError::Transport(error_chain(&err))
    }
}

/// Render an error and all of its sources, one per line.
pub fn error_chain(err: &dyn error::Error) -> String {
    let mut buf = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        buf.push_str("\n  caused by: ");
        buf.push_str(&cause.to_string());
        source = cause.source();
    }
    buf
}
