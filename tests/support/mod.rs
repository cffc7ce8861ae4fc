#![allow(dead_code)]

use caserun::{
    errors::ExecError,
    executor::process::{OutputLine, ProcessOutput, ProcessSpec, Spawner, Stream},
};
use futures::future::BoxFuture;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// What the server saw of one request.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serve every connection with the same reply and record the requests.
pub async fn serve(reply: Reply) -> (SocketAddr, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let reply = reply.clone();
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let _ = handle(stream, reply, log).await;
            });
        }
    });

    (addr, seen)
}

async fn handle(
    mut stream: TcpStream,
    reply: Reply,
    log: Arc<Mutex<Vec<Seen>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).into_owned();

    log.lock().unwrap().push(Seen {
        method,
        target,
        headers,
        body,
    });

    tokio::time::sleep(reply.delay).await;
    let response = format!(
        "HTTP/1.1 {} OK\r\nContent-Type: {}\r\nX-Served-By: support\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reply.content_type,
        reply.body.len(),
        reply.body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// A spawner that never starts a process. It writes `report` (if any) to
/// the report path found in the arguments and exits with `exit_code`.
pub struct FakeSpawner {
    pub calls: AtomicUsize,
    pub specs: Mutex<Vec<ProcessSpec>>,
    pub report: Option<serde_json::Value>,
    pub exit_code: Option<i32>,
    pub stderr: Vec<String>,
    /// Contents of the `--environment` file, read while it still exists.
    pub environments: Mutex<Vec<serde_json::Value>>,
}

impl FakeSpawner {
    pub fn new(report: Option<serde_json::Value>, exit_code: Option<i32>) -> Arc<Self> {
        Arc::new(Self::build(report, exit_code, Vec::new()))
    }

    pub fn with_stderr(exit_code: Option<i32>, stderr: &[&str]) -> Arc<Self> {
        let lines = stderr.iter().map(|s| s.to_string()).collect();
        Arc::new(Self::build(None, exit_code, lines))
    }

    fn build(report: Option<serde_json::Value>, exit_code: Option<i32>, stderr: Vec<String>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            specs: Mutex::new(Vec::new()),
            report,
            exit_code,
            stderr,
            environments: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> ProcessSpec {
        self.specs.lock().unwrap().last().cloned().unwrap()
    }
}

/// Path the tool was asked to write its JSON report to.
pub fn report_arg(args: &[String]) -> Option<PathBuf> {
    if let Some(pos) = args.iter().position(|a| a == "--reporter-json-export") {
        return args.get(pos + 1).map(PathBuf::from);
    }
    args.iter()
        .find_map(|a| a.strip_prefix("--json-report-file="))
        .map(PathBuf::from)
}

impl Spawner for FakeSpawner {
    fn spawn(&self, spec: ProcessSpec) -> BoxFuture<'_, Result<ProcessOutput, ExecError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let (Some(report), Some(path)) = (&self.report, report_arg(&spec.args)) {
                tokio::fs::write(&path, report.to_string()).await?;
            }
            if let Some(pos) = spec.args.iter().position(|a| a == "--environment") {
                let contents = tokio::fs::read_to_string(&spec.args[pos + 1]).await?;
                let bundle = serde_json::from_str(&contents).unwrap();
                self.environments.lock().unwrap().push(bundle);
            }
            self.specs.lock().unwrap().push(spec);
            Ok(ProcessOutput {
                exit_code: self.exit_code,
                timed_out: false,
                lines: self
                    .stderr
                    .iter()
                    .map(|text| OutputLine {
                        stream: Stream::Stderr,
                        text: text.clone(),
                    })
                    .collect(),
            })
        })
    }
}
