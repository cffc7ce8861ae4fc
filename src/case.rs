//! Declarative test-case configurations.
//!
//! A [TestCaseConfig] carries a free-form `type` tag and a JSON `config`
//! payload. The registry dispatches on the tag and the selected runner
//! decodes the payload into one of the typed shapes below.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::ExecError;

/// Type for identifying cases.
pub type Id = u64;

/// Tag of cases executed in-process as a single HTTP request.
pub const DIRECT_HTTP: &str = "direct-http";
/// Tag of cases executed by the external collection-runner tool.
pub const COLLECTION: &str = "collection";
/// Tag of cases executed by the external test-framework process.
pub const SCRIPT: &str = "script";

/// One unit of test work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseConfig {
    pub id: Id,
    pub name: String,
    /// Declared kind of the case, used to pick a runner.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific configuration.
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
}

impl TestCaseConfig {
    fn typed<C: Serialize>(id: Id, name: &str, kind: &str, config: &C) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind: kind.to_string(),
            // Serializing plain structs of strings and maps cannot fail.
            config: serde_json::to_value(config).unwrap_or(Value::Null),
            environment: None,
        }
    }

    /// Build a `direct-http` case.
    pub fn direct_http(id: Id, name: &str, config: &HttpCaseConfig) -> Self {
        Self::typed(id, name, DIRECT_HTTP, config)
    }

    /// Build a `collection` case.
    pub fn collection(id: Id, name: &str, config: &CollectionCaseConfig) -> Self {
        Self::typed(id, name, COLLECTION, config)
    }

    /// Build a `script` case.
    pub fn script(id: Id, name: &str, config: &ScriptCaseConfig) -> Self {
        Self::typed(id, name, SCRIPT, config)
    }

    pub fn with_environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Decode the kind-specific configuration.
    pub fn decode<C: serde::de::DeserializeOwned>(&self) -> Result<C, ExecError> {
        C::deserialize(&self.config).map_err(|err| {
            ExecError::Config(format!(
                "Invalid {} configuration for case {}: {}",
                self.kind, self.id, err
            ))
        })
    }
}

/// Base URL, variables and headers applied to a case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(default, alias = "base_url", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    /// Overlay `case` on top of `self`. The base URL and every variable and
    /// header defined by the case win key by key.
    pub fn merge(&self, case: Option<&EnvironmentConfig>) -> EnvironmentConfig {
        let mut merged = self.clone();
        if let Some(case) = case {
            if case.base_url.is_some() {
                merged.base_url = case.base_url.clone();
            }
            merged.variables.extend(
                case.variables.iter().map(|(k, v)| (k.clone(), v.clone())),
            );
            merged.headers.extend(
                case.headers.iter().map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        merged
    }
}

/// Configuration of a `direct-http` case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCaseConfig {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// What part of the response an assertion looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionKind {
    Status,
    JsonPath,
    Header,
    Contains,
    ResponseTime,
    Schema,
}

impl AssertionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionKind::Status => "status",
            AssertionKind::JsonPath => "jsonPath",
            AssertionKind::Header => "header",
            AssertionKind::Contains => "contains",
            AssertionKind::ResponseTime => "responseTime",
            AssertionKind::Schema => "schema",
        }
    }
}

/// Comparison applied between the actual and expected values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    NotContains,
    Regex,
    Exists,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::NotContains => "notContains",
            Operator::Regex => "regex",
            Operator::Exists => "exists",
        }
    }
}

/// A check evaluated against the response of a `direct-http` case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub operator: Operator,
    #[serde(default)]
    pub expected: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Configuration of a `collection` case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCaseConfig {
    pub collection_json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_count: Option<u32>,
    /// Delay between requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_request: Option<u64>,
}

/// Configuration of a `script` case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCaseConfig {
    pub script_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_function: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides the test-framework binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_path: Option<String>,
    /// Timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(base: Option<&str>, vars: &[(&str, &str)]) -> EnvironmentConfig {
        EnvironmentConfig {
            base_url: base.map(String::from),
            variables: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn merge_is_keywise_and_case_wins() {
        let runner = env(Some("http://runner"), &[("a", "1"), ("b", "2")]);
        let case = env(None, &[("b", "3"), ("c", "4")]);
        let merged = runner.merge(Some(&case));

        assert_eq!(merged.base_url.as_deref(), Some("http://runner"));
        assert_eq!(merged.variables["a"], "1");
        assert_eq!(merged.variables["b"], "3");
        assert_eq!(merged.variables["c"], "4");
    }

    #[test]
    fn merge_prefers_case_base_url() {
        let runner = env(Some("http://runner"), &[]);
        let case = env(Some("http://case"), &[]);
        assert_eq!(
            runner.merge(Some(&case)).base_url.as_deref(),
            Some("http://case")
        );
        assert_eq!(runner.merge(None), runner);
    }

    #[test]
    fn parses_camel_case_wire_shape() {
        let case: TestCaseConfig = serde_json::from_value(json!({
            "id": 7,
            "name": "login",
            "type": "direct-http",
            "config": {
                "method": "POST",
                "url": "/login",
                "assertions": [
                    {"type": "jsonPath", "target": "$.ok", "operator": "eq", "expected": true}
                ]
            },
            "environment": {"baseUrl": "http://localhost"}
        }))
        .unwrap();

        assert_eq!(case.kind, DIRECT_HTTP);
        let http: HttpCaseConfig = case.decode().unwrap();
        assert_eq!(http.assertions[0].kind, AssertionKind::JsonPath);
        assert_eq!(http.assertions[0].operator, Operator::Eq);
        assert_eq!(
            case.environment.unwrap().base_url.as_deref(),
            Some("http://localhost")
        );
    }

    #[test]
    fn decode_reports_the_case() {
        let case = TestCaseConfig {
            id: 3,
            name: "broken".into(),
            kind: SCRIPT.into(),
            config: json!({"args": []}),
            environment: None,
        };
        let err = case.decode::<ScriptCaseConfig>().unwrap_err();
        assert!(err.to_string().contains("case 3"));
    }
}
