//! Spawning external tools.
//!
//! Out-of-process runners go through the [Spawner] trait so the process
//! boundary can be replaced in tests.
use futures::future::BoxFuture;
use std::{fmt, path::PathBuf, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    process::Command,
    time,
};

use crate::errors::ExecError;

/// A process to run.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment.
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Kill the process if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Which stream a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Line of output, in the order it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` if the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub lines: Vec<OutputLine>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Lines read from one stream.
    pub fn stream(&self, stream: Stream) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(move |line| line.stream == stream)
            .map(|line| line.text.as_str())
    }
}

/// Runs external processes.
pub trait Spawner: Send + Sync {
    fn spawn(&self, spec: ProcessSpec) -> BoxFuture<'_, Result<ProcessOutput, ExecError>>;
}

/// Spawns real OS processes with tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, spec: ProcessSpec) -> BoxFuture<'_, Result<ProcessOutput, ExecError>> {
        Box::pin(run_process(spec))
    }
}

/// Read the next line of a stream, or wait forever once it is closed.
async fn next_line<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => futures::future::pending().await,
    }
}

async fn run_process(spec: ProcessSpec) -> Result<ProcessOutput, ExecError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    tracing::debug!(command = %spec, "spawning process");
    let mut child = cmd
        .spawn()
        .map_err(|err| ExecError::Process(format!("{}: {}", spec.program, err)))?;

    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut lines = Vec::new();

    let drain = async {
        loop {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Ok(Some(text)) => {
                        tracing::debug!(stream = "stdout", "{}", text);
                        lines.push(OutputLine { stream: Stream::Stdout, text });
                    }
                    _ => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Ok(Some(text)) => {
                        tracing::debug!(stream = "stderr", "{}", text);
                        lines.push(OutputLine { stream: Stream::Stderr, text });
                    }
                    _ => stderr = None,
                },
                else => break,
            }
        }
        child.wait().await
    };

    let waited = match spec.timeout {
        Some(limit) => time::timeout(limit, drain).await.ok(),
        None => Some(drain.await),
    };

    match waited {
        Some(status) => {
            let status = status.map_err(|err| {
                ExecError::Process(format!("{}: {}", spec.program, err))
            })?;
            Ok(ProcessOutput {
                exit_code: status.code(),
                timed_out: false,
                lines,
            })
        }
        None => {
            tracing::warn!(command = %spec, "process timed out, killing it");
            if let Err(err) = child.kill().await {
                tracing::warn!(command = %spec, "failed to kill process: {}", err);
            }
            Ok(ProcessOutput {
                exit_code: None,
                timed_out: true,
                lines,
            })
        }
    }
}

/// Run `<program> --version` and report whether it exited cleanly.
pub async fn tool_responds(spawner: &dyn Spawner, program: &str) -> bool {
    let spec = ProcessSpec::new(program)
        .args(["--version"])
        .timeout(Some(Duration::from_secs(30)));
    match spawner.spawn(spec).await {
        Ok(out) => out.success(),
        Err(err) => {
            tracing::debug!("{} is not available: {}", program, err);
            false
        }
    }
}
