//! Execution of request-collection bundles through an external
//! collection-runner tool (newman by default).
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::fs;

use super::{
    epoch_ms,
    process::{self, ProcessOutput, ProcessSpec, Spawner, Stream, TokioSpawner},
    results::{AssertionResult, ExecutionResult, ReportSummary, Status},
    Runner, RunnerBase,
};
use crate::{
    case::{CollectionCaseConfig, TestCaseConfig},
    errors::ExecError,
};

/// Settings of the collection runner.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// Collection-runner binary.
    pub binary: String,
    /// Directory that receives the temporary collection, environment and
    /// report files.
    pub scratch_dir: PathBuf,
    /// Optional limit on how long the tool may run, in milliseconds. Unset
    /// means the tool is never killed.
    pub timeout_ms: Option<u64>,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            binary: "newman".to_string(),
            scratch_dir: std::env::temp_dir().join("caserun"),
            timeout_ms: None,
        }
    }
}

/// Temporary files owned by one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub collection: PathBuf,
    pub environment: PathBuf,
    pub report: PathBuf,
}

impl Artifacts {
    pub fn new(dir: &Path, case: crate::case::Id, stamp: u128) -> Self {
        Self {
            collection: dir.join(format!("collection_{}_{}.json", case, stamp)),
            environment: dir.join(format!("environment_{}_{}.json", case, stamp)),
            report: dir.join(format!("report_{}_{}.json", case, stamp)),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.collection, &self.environment, &self.report]
    }
}

/// Runs collection bundles with an external tool and reads its JSON report.
pub struct CollectionRunner {
    base: RunnerBase,
    settings: CollectionSettings,
    spawner: Arc<dyn Spawner>,
}

impl Default for CollectionRunner {
    fn default() -> Self {
        Self::new(CollectionSettings::default())
    }
}

impl CollectionRunner {
    pub fn new(settings: CollectionSettings) -> Self {
        Self::with_spawner(settings, Arc::new(TokioSpawner))
    }

    pub fn with_spawner(settings: CollectionSettings, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            base: RunnerBase::new("Newman Runner"),
            settings,
            spawner,
        }
    }

    async fn execute(&self, case: &TestCaseConfig) -> ExecutionResult {
        let started = Instant::now();
        let mut logs = Vec::new();
        let artifacts = Artifacts::new(&self.settings.scratch_dir, case.id, epoch_ms());

        let outcome = self.invoke(case, &artifacts, &mut logs).await;
        let result = match outcome {
            Ok(out) => self.conclude(&artifacts, &out, started).await,
            Err(err) => {
                logs.push(format!("[ERROR] {}", err));
                ExecutionResult::error(&err, started.elapsed())
            }
        };

        cleanup(&artifacts.all()).await;
        tracing::info!(case = case.id, status = result.status.as_str(), "collection finished");
        result.with_logs(logs)
    }

    /// Write the temporary files and run the tool.
    async fn invoke(
        &self,
        case: &TestCaseConfig,
        artifacts: &Artifacts,
        logs: &mut Vec<String>,
    ) -> Result<ProcessOutput, ExecError> {
        let config: CollectionCaseConfig = case.decode()?;
        let env = self.base.merge_environment(case.environment.as_ref());

        fs::create_dir_all(&self.settings.scratch_dir).await?;
        fs::write(
            &artifacts.collection,
            serde_json::to_string_pretty(&config.collection_json)?,
        )
        .await?;
        logs.push(format!(
            "[INFO] Collection saved to {}",
            artifacts.collection.display()
        ));

        let environment = match &config.environment_json {
            Some(bundle) => {
                let bundle = merge_environment_bundle(bundle.clone(), &env.variables);
                fs::write(&artifacts.environment, serde_json::to_string_pretty(&bundle)?)
                    .await?;
                logs.push(format!(
                    "[INFO] Environment saved to {}",
                    artifacts.environment.display()
                ));
                Some(artifacts.environment.as_path())
            }
            None => None,
        };

        let spec = ProcessSpec::new(&self.settings.binary)
            .args(build_args(&config, artifacts, environment))
            .timeout(self.settings.timeout_ms.map(Duration::from_millis));
        logs.push(format!("[CMD] {}", spec));

        let out = self.spawner.spawn(spec).await?;
        for line in &out.lines {
            let tag = match line.stream {
                Stream::Stdout => "STDOUT",
                Stream::Stderr => "STDERR",
            };
            logs.push(format!("[{}] {}", tag, line.text));
        }
        if out.timed_out {
            logs.push("[ERROR] Process timed out and was killed".to_string());
        }
        Ok(out)
    }

    /// Turn the report (or, without one, the exit code) into a result.
    async fn conclude(
        &self,
        artifacts: &Artifacts,
        out: &ProcessOutput,
        started: Instant,
    ) -> ExecutionResult {
        match fs::read_to_string(&artifacts.report).await {
            Ok(contents) => {
                let report = parse_report(&contents);
                ExecutionResult::verdict(report.failed == 0, started.elapsed())
                    .with_message(report.headline())
                    .with_response_data(report.summary.clone())
                    .with_assertions(report.assertions)
            }
            Err(_) if out.success() => {
                ExecutionResult::new(Status::Passed, started.elapsed())
            }
            Err(_) => {
                let stderr: Vec<&str> = out.stream(Stream::Stderr).collect();
                let message = if stderr.is_empty() {
                    match out.exit_code {
                        Some(code) => format!("{} exited with code {}", self.settings.binary, code),
                        None => format!("{} was terminated", self.settings.binary),
                    }
                } else {
                    stderr.join("\n")
                };
                ExecutionResult::new(Status::Error, started.elapsed())
                    .with_error_message(message)
            }
        }
    }
}

impl Runner for CollectionRunner {
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

/// Argument list of the collection-runner tool.
pub fn build_args(
    config: &CollectionCaseConfig,
    artifacts: &Artifacts,
    environment: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        artifacts.collection.display().to_string(),
        "--reporters".to_string(),
        "json".to_string(),
        "--reporter-json-export".to_string(),
        artifacts.report.display().to_string(),
    ];
    if let Some(path) = environment {
        args.push("--environment".to_string());
        args.push(path.display().to_string());
    }
    if let Some(count) = config.iteration_count.filter(|&n| n > 1) {
        args.push("--iteration-count".to_string());
        args.push(count.to_string());
    }
    if let Some(delay) = config.delay_request.filter(|&n| n > 0) {
        args.push("--delay-request".to_string());
        args.push(delay.to_string());
    }
    args
}

/// Merge variables into the `values` list of an environment bundle. Matching
/// keys are updated in place, new keys are appended as enabled entries.
pub fn merge_environment_bundle(mut bundle: Value, variables: &BTreeMap<String, String>) -> Value {
    if let Some(object) = bundle.as_object_mut() {
        let values = object
            .entry("values")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(values) = values.as_array_mut() {
            for (key, value) in variables {
                let existing = values.iter_mut().find(|entry| {
                    entry.get("key").and_then(Value::as_str) == Some(key.as_str())
                });
                match existing {
                    Some(entry) => entry["value"] = Value::String(value.clone()),
                    None => values.push(json!({"key": key, "value": value, "enabled": true})),
                }
            }
        }
    }
    bundle
}

/// Read a JSON report. Anything unreadable degrades to an empty summary.
pub fn parse_report(contents: &str) -> ReportSummary {
    let report: Value = match serde_json::from_str(contents) {
        Ok(report) => report,
        Err(err) => {
            let err = ExecError::ReportParse(format!("malformed collection report: {}", err));
            tracing::warn!("{}, treating it as empty", err);
            return ReportSummary::default();
        }
    };
    let run = &report["run"];
    let mut summary = ReportSummary::default();

    for execution in run["executions"].as_array().into_iter().flatten() {
        let item = execution["item"]["name"].as_str().map(String::from);
        for assertion in execution["assertions"].as_array().into_iter().flatten() {
            let error = assertion.get("error").filter(|e| !e.is_null());
            let actual = match error {
                None => json!("pass"),
                Some(err) => err["message"]
                    .as_str()
                    .map(Value::from)
                    .unwrap_or_else(|| json!("failed")),
            };
            summary.push(AssertionResult {
                name: assertion["assertion"]
                    .as_str()
                    .unwrap_or("Unknown assertion")
                    .to_string(),
                passed: error.is_none(),
                expected: json!("pass"),
                actual,
                message: item.clone(),
            });
        }
    }

    summary.summary = json!({
        "iterations": run["stats"]["iterations"],
        "requests": run["stats"]["requests"],
        "assertions": run["stats"]["assertions"],
        "timings": run["timings"],
    });
    summary
}

/// Delete files, ignoring the ones that are missing or cannot be removed.
pub(crate) async fn cleanup(paths: &[&Path]) {
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("failed to remove {}: {}", path.display(), err),
        }
    }
}
