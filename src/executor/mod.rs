//! An executor is responsible for running test cases and generating results.
//!
//! Every runner implements [Runner]. The trait is object safe so that the
//! [registry](registry::Registry) can hold runners of different kinds behind
//! `Arc<dyn Runner>` and dispatch on the case's `type` tag.

pub mod assert;
pub mod collection;
pub mod http;
pub mod process;
pub mod registry;
pub mod results;
pub mod script;

pub use collection::CollectionRunner;
pub use http::HttpRunner;
pub use registry::Registry;
pub use results::{AssertionResult, ExecutionResult, Status};
pub use script::ScriptRunner;

use futures::future::BoxFuture;
use std::{
    collections::BTreeMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::case::{EnvironmentConfig, TestCaseConfig};

/// Behavior shared by every kind of runner.
pub trait Runner: Send + Sync {
    /// State common to all runners.
    fn base(&self) -> &RunnerBase;

    /// Execute one case. All failure modes are encoded in the result.
    fn run<'a>(&'a self, case: &'a TestCaseConfig) -> BoxFuture<'a, ExecutionResult>;

    /// Whether the runner's external dependency is usable.
    fn is_available(&self) -> BoxFuture<'_, bool>;

    fn name(&self) -> &str {
        &self.base().name
    }

    /// Set the runner-level default environment.
    fn set_environment(&self, env: EnvironmentConfig) {
        self.base().set_environment(env)
    }
}

/// Name and runner-level environment of a runner.
pub struct RunnerBase {
    name: String,
    environment: RwLock<EnvironmentConfig>,
}

impl RunnerBase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            environment: RwLock::new(EnvironmentConfig::default()),
        }
    }

    pub fn set_environment(&self, env: EnvironmentConfig) {
        let mut guard = self
            .environment
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = env;
    }

    /// Merge the case environment over the runner default.
    pub fn merge_environment(
        &self,
        case_env: Option<&EnvironmentConfig>,
    ) -> EnvironmentConfig {
        self.environment
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .merge(case_env)
    }
}

/// Replace every `{{key}}` and `${key}` occurrence for each variable.
/// Placeholders without a matching variable are left untouched.
pub fn substitute(text: &str, variables: &BTreeMap<String, String>) -> String {
    let mut result = text.to_string();
    for (key, value) in variables {
        result = result
            .replace(&format!("{{{{{}}}}}", key), value)
            .replace(&format!("${{{}}}", key), value);
    }
    result
}

/// Milliseconds since the unix epoch, used to key temp files.
pub(crate) fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Shorten `text` to `limit` characters for logging.
pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_both_placeholder_styles() {
        let vars = vars(&[("host", "api.example.com"), ("port", "8080")]);
        assert_eq!(
            substitute("https://{{host}}:${port}/{{host}}", &vars),
            "https://api.example.com:8080/api.example.com"
        );
    }

    #[test]
    fn leaves_unknown_placeholders() {
        let vars = vars(&[("a", "1")]);
        assert_eq!(substitute("{{b}} ${c} {{a}}", &vars), "{{b}} ${c} 1");
    }

    #[test]
    fn keys_are_literal() {
        let vars = vars(&[("a.b", "x")]);
        assert_eq!(substitute("{{a.b}} {{aXb}}", &vars), "x {{aXb}}");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn base_merges_runner_default() {
        let base = RunnerBase::new("test");
        base.set_environment(EnvironmentConfig {
            base_url: Some("http://default".into()),
            ..Default::default()
        });
        let merged = base.merge_environment(None);
        assert_eq!(merged.base_url.as_deref(), Some("http://default"));
    }
}
