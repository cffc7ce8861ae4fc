//! The registry maps case types to runners and schedules batches of cases.
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::mpsc;

use super::{
    collection::{CollectionRunner, CollectionSettings},
    http::HttpRunner,
    results::ExecutionResult,
    script::{ScriptRunner, ScriptSettings},
    Runner,
};
use crate::{
    case::{self, EnvironmentConfig, TestCaseConfig},
    errors::ExecError,
};

/// Number of cases per wave when none is given.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Availability of one registered runner.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunnerInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub available: bool,
}

/// How a batch is scheduled.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Run waves of cases concurrently instead of one case at a time.
    pub parallel: bool,
    /// Size of each wave in parallel mode.
    pub max_concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Called once per finished case with `(completed, total, result)`.
pub type Progress<'a> = dyn FnMut(usize, usize, &ExecutionResult) + Send + 'a;

/// Settings used to build the default registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    /// Runner-level default environment applied to every runner.
    pub environment: Option<EnvironmentConfig>,
    pub collection: CollectionSettings,
    pub script: ScriptSettings,
}

/// Maps case types to runners.
#[derive(Clone, Default)]
pub struct Registry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Build the process-wide registry with the default runners. Later calls
/// return the registry built by the first one.
pub fn init(settings: RegistrySettings) -> &'static Registry {
    GLOBAL.get_or_init(|| Registry::with_defaults(settings))
}

/// The process-wide registry, if [init] has been called.
pub fn global() -> Option<&'static Registry> {
    GLOBAL.get()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `direct-http`, `collection` and `script` runners.
    pub fn with_defaults(settings: RegistrySettings) -> Self {
        let RegistrySettings {
            environment,
            collection,
            script,
        } = settings;
        let mut registry = Self::new();
        registry.register(case::DIRECT_HTTP, Arc::new(HttpRunner::new()));
        registry.register(case::COLLECTION, Arc::new(CollectionRunner::new(collection)));
        registry.register(case::SCRIPT, Arc::new(ScriptRunner::new(script)));
        if let Some(env) = environment {
            for runner in registry.runners.values() {
                runner.set_environment(env.clone());
            }
        }
        registry
    }

    pub fn register(&mut self, kind: &str, runner: Arc<dyn Runner>) {
        self.runners.insert(kind.to_string(), runner);
    }

    pub fn get_runner(&self, kind: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(kind).cloned()
    }

    /// Check every registered runner, sorted by type.
    pub async fn available_runners(&self) -> Vec<RunnerInfo> {
        let mut kinds: Vec<&String> = self.runners.keys().collect();
        kinds.sort();
        let mut infos = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let runner = &self.runners[kind];
            infos.push(RunnerInfo {
                kind: kind.clone(),
                name: runner.name().to_string(),
                available: runner.is_available().await,
            });
        }
        infos
    }

    /// Execute one case with the runner registered for its type.
    pub async fn execute(&self, case: &TestCaseConfig) -> ExecutionResult {
        let runner = match self.runners.get(&case.kind) {
            Some(runner) => runner,
            None => {
                let err = ExecError::Config(format!("Unknown test case type: {}", case.kind));
                tracing::warn!(case = case.id, "{}", err);
                return ExecutionResult::error(&err, Duration::ZERO);
            }
        };

        if !runner.is_available().await {
            let err = ExecError::Unavailable(format!(
                "Runner \"{}\" is not available. Please install the required dependencies.",
                runner.name()
            ));
            tracing::warn!(case = case.id, "{}", err);
            return ExecutionResult::error(&err, Duration::ZERO);
        }

        tracing::debug!(case = case.id, runner = runner.name(), "executing case");
        runner.run(case).await
    }

    /// Execute many cases and collect their results by case id.
    ///
    /// In serial mode cases run one after another in input order. In
    /// parallel mode the input is cut into waves of `max_concurrency` cases;
    /// every case of a wave runs concurrently and the next wave starts once
    /// all of them have settled. `on_progress` fires as each case finishes,
    /// so within a wave it observes completion order.
    pub async fn execute_batch(
        &self,
        cases: Vec<TestCaseConfig>,
        options: BatchOptions,
        mut on_progress: Option<&mut Progress<'_>>,
    ) -> HashMap<case::Id, ExecutionResult> {
        let total = cases.len();
        let mut results = HashMap::with_capacity(total);
        let mut completed = 0;
        let mut report = |result: &ExecutionResult, completed: usize| {
            if let Some(callback) = on_progress.as_mut() {
                callback(completed, total, result);
            }
        };

        if !options.parallel {
            for case in cases {
                let result = self.execute(&case).await;
                completed += 1;
                report(&result, completed);
                results.insert(case.id, result);
            }
            return results;
        }

        let shared = Arc::new(self.clone());
        let wave_size = options.max_concurrency.max(1);
        let mut pending = cases.into_iter().peekable();

        while pending.peek().is_some() {
            let wave: Vec<TestCaseConfig> = pending.by_ref().take(wave_size).collect();
            tracing::debug!(size = wave.len(), "starting wave");

            let (tx, mut rx) = mpsc::unbounded_channel();
            let handles: Vec<_> = wave
                .iter()
                .map(|case| {
                    let registry = Arc::clone(&shared);
                    let tx = tx.clone();
                    let case = case.clone();
                    tokio::spawn(async move {
                        let result = registry.execute(&case).await;
                        // The receiver outlives every task of the wave.
                        let _ = tx.send((case.id, result));
                    })
                })
                .collect();
            drop(tx);

            let mut settled = Vec::with_capacity(wave.len());
            while let Some((id, result)) = rx.recv().await {
                completed += 1;
                report(&result, completed);
                settled.push(id);
                results.insert(id, result);
            }

            // A task that panicked never reported back.
            for (case, handle) in wave.iter().zip(handles) {
                if let Err(err) = handle.await {
                    if settled.contains(&case.id) {
                        continue;
                    }
                    let err = ExecError::Process(format!(
                        "Runner task for case {} failed: {}",
                        case.id, err
                    ));
                    let result = ExecutionResult::error(&err, Duration::ZERO);
                    completed += 1;
                    report(&result, completed);
                    results.insert(case.id, result);
                }
            }
        }

        results
    }
}
