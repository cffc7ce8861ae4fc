//! Execution of test scripts through an external test-framework process
//! (pytest by default).
use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    path::{Component, Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};
use tokio::fs;

use super::{
    collection::cleanup,
    epoch_ms,
    process::{self, ProcessSpec, Spawner, Stream, TokioSpawner},
    results::{AssertionResult, ExecutionResult, ReportSummary, Status},
    Runner, RunnerBase,
};
use crate::{
    case::{EnvironmentConfig, ScriptCaseConfig, TestCaseConfig},
    errors::ExecError,
};

/// Settings of the script runner.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Test-framework binary, unless a case overrides it.
    pub binary: String,
    /// Timeout in milliseconds for cases that do not set one.
    pub timeout_ms: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            binary: "pytest".to_string(),
            timeout_ms: 300_000,
        }
    }
}

/// Runs one script (or one test function of it) and reads the JSON report.
pub struct ScriptRunner {
    base: RunnerBase,
    settings: ScriptSettings,
    spawner: Arc<dyn Spawner>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(ScriptSettings::default())
    }
}

impl ScriptRunner {
    pub fn new(settings: ScriptSettings) -> Self {
        Self::with_spawner(settings, Arc::new(TokioSpawner))
    }

    pub fn with_spawner(settings: ScriptSettings, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            base: RunnerBase::new("Pytest Runner"),
            settings,
            spawner,
        }
    }

    async fn execute(&self, case: &TestCaseConfig) -> ExecutionResult {
        let started = Instant::now();
        let mut logs = Vec::new();

        let config: ScriptCaseConfig = match case.decode() {
            Ok(config) => config,
            Err(err) => {
                logs.push(format!("[ERROR] {}", err));
                return ExecutionResult::error(&err, started.elapsed()).with_logs(logs);
            }
        };

        let script = match absolute(Path::new(&config.script_path)) {
            Ok(script) if script.exists() => script,
            Ok(script) => {
                let err = ExecError::Config(format!("Script not found: {}", script.display()));
                logs.push(format!("[ERROR] {}", err));
                return ExecutionResult::error(&err, started.elapsed()).with_logs(logs);
            }
            Err(err) => {
                logs.push(format!("[ERROR] {}", err));
                return ExecutionResult::error(&err, started.elapsed()).with_logs(logs);
            }
        };

        let program = config
            .python_path
            .clone()
            .unwrap_or_else(|| self.settings.binary.clone());
        let report = report_path(&script, &program, case.id, epoch_ms());
        let env = self.base.merge_environment(case.environment.as_ref());
        let timeout_ms = config
            .timeout
            .filter(|&ms| ms > 0)
            .unwrap_or(self.settings.timeout_ms);
        let timeout = Duration::from_millis(timeout_ms);

        let mut spec = ProcessSpec::new(&program)
            .args(build_args(&script, &config, &report))
            .timeout(Some(timeout));
        spec.envs = child_env(&env);
        logs.push(format!("[CMD] {}", spec));

        let out = match self.spawner.spawn(spec).await {
            Ok(out) => out,
            Err(err) => {
                logs.push(format!("[ERROR] Process error: {}", err));
                cleanup(&[report.as_path()]).await;
                return ExecutionResult::error(&err, started.elapsed()).with_logs(logs);
            }
        };

        for line in &out.lines {
            match line.stream {
                Stream::Stdout if is_log_worthy(&line.text) => {
                    logs.push(format!("[PYTEST] {}", line.text.trim()))
                }
                Stream::Stdout => {}
                Stream::Stderr => logs.push(format!("[STDERR] {}", line.text)),
            }
        }
        if out.timed_out {
            logs.push(format!(
                "[ERROR] Process timed out after {}ms and was killed",
                timeout.as_millis()
            ));
        }

        let result = match fs::read_to_string(&report).await {
            Ok(contents) => {
                let parsed = parse_report(&contents);
                ExecutionResult::verdict(parsed.failed == 0 && out.success(), started.elapsed())
                    .with_message(parsed.headline())
                    .with_response_data(parsed.summary.clone())
                    .with_assertions(parsed.assertions)
            }
            Err(_) if out.success() => ExecutionResult::new(Status::Passed, started.elapsed()),
            Err(_) => ExecutionResult::new(Status::Error, started.elapsed())
                .with_error_message(format!("{} execution failed", program)),
        };
        cleanup(&[report.as_path()]).await;

        tracing::info!(case = case.id, status = result.status.as_str(), "script finished");
        result.with_logs(logs)
    }
}

impl Runner for ScriptRunner {
    fn base(&self) -> &RunnerBase {
        &self.base
    }

    fn run<'a>(&'a self, case: &'a TestCaseConfig) -> BoxFuture<'a, ExecutionResult> {
        Box::pin(self.execute(case))
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            process::tool_responds(self.spawner.as_ref(), &self.settings.binary).await
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ExecError> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Drop `.` segments and fold `..` into its parent without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Hidden report file next to the script.
pub fn report_path(script: &Path, program: &str, case: crate::case::Id, stamp: u128) -> PathBuf {
    let tool = Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script");
    let dir = script.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{}_report_{}_{}.json", tool, case, stamp))
}

/// Argument list of the test-framework process.
pub fn build_args(script: &Path, config: &ScriptCaseConfig, report: &Path) -> Vec<String> {
    let target = match &config.test_function {
        Some(function) => format!("{}::{}", script.display(), function),
        None => script.display().to_string(),
    };
    let mut args = vec![
        target,
        "--json-report".to_string(),
        format!("--json-report-file={}", report.display()),
        "-v".to_string(),
    ];
    args.extend(config.args.iter().cloned());
    args
}

/// Variables added to the inherited environment of the child process.
pub fn child_env(env: &EnvironmentConfig) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    if let Some(base_url) = &env.base_url {
        vars.push(("BASE_URL".to_string(), base_url.clone()));
    }
    vars.extend(
        env.variables
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone())),
    );
    vars
}

/// Stdout lines that carry outcomes or test ids.
fn is_log_worthy(line: &str) -> bool {
    static MARKERS: OnceLock<Option<Regex>> = OnceLock::new();
    if line.trim().is_empty() {
        return false;
    }
    MARKERS
        .get_or_init(|| Regex::new("PASSED|FAILED|ERROR|::").ok())
        .as_ref()
        .map_or(true, |re| re.is_match(line))
}

/// Read a JSON test report. Anything unreadable degrades to an empty summary.
pub fn parse_report(contents: &str) -> ReportSummary {
    let report: Value = match serde_json::from_str(contents) {
        Ok(report) => report,
        Err(err) => {
            let err = ExecError::ReportParse(format!("malformed test report: {}", err));
            tracing::warn!("{}, treating it as empty", err);
            return ReportSummary::default();
        }
    };
    let mut summary = ReportSummary::default();

    for test in report["tests"].as_array().into_iter().flatten() {
        let outcome = test["outcome"].clone();
        let name = test["nodeid"]
            .as_str()
            .or_else(|| test["name"].as_str())
            .unwrap_or("Unknown test");
        let message = match &test["call"]["longrepr"] {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        };
        summary.push(AssertionResult {
            name: name.to_string(),
            passed: outcome.as_str() == Some("passed"),
            expected: json!("pass"),
            actual: outcome,
            message,
        });
    }

    summary.summary = json!({
        "duration": report["duration"],
        "created": report["created"],
        "exitcode": report["exitcode"],
        "environment": report["environment"],
    });
    summary
}
