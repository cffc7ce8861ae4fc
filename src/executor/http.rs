//! In-process execution of `direct-http` cases.
use futures::future::BoxFuture;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, Method, Url,
};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};
use tokio::time;

use super::{
    assert::{self, ResponseView},
    results::ExecutionResult,
    substitute, truncate, Runner, RunnerBase,
};
use crate::{
    case::{EnvironmentConfig, HttpCaseConfig, TestCaseConfig},
    errors::ExecError,
};

/// Timeout applied when a case does not declare one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Bodies are cut to this many characters in logs.
const LOG_BODY_LIMIT: usize = 500;

/// Executes one HTTP request and checks its assertions.
pub struct HttpRunner {
    base: RunnerBase,
    client: Client,
}

/// A request after environment resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

struct RawResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    text: String,
    elapsed: Duration,
}

impl Default for HttpRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRunner {
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("falling back to default HTTP client: {}", err);
                Client::new()
            });
        Self {
            base: RunnerBase::new("HTTP Runner"),
            client,
        }
    }

    async fn execute(&self, case: &TestCaseConfig) -> ExecutionResult {
        let started = Instant::now();
        let mut logs = Vec::new();
        let env = self.base.merge_environment(case.environment.as_ref());

        let outcome = async {
            let config: HttpCaseConfig = case.decode()?;
            let request = prepare(&config, &env)?;
            log_request(&request, &mut logs);
            let response = self.send(&request).await?;
            Ok::<_, ExecError>((config, response))
        }
        .await;

        let (config, response) = match outcome {
            Ok(ok) => ok,
            Err(err) => {
                logs.push(format!("[ERROR] {}", err));
                tracing::info!(case = case.id, "request errored: {}", err);
                return ExecutionResult::error(&err, started.elapsed()).with_logs(logs);
            }
        };

        let response_time = response.elapsed.as_millis() as u64;
        let body = parse_body(&response.headers, &response.text);
        logs.push(format!(
            "[RESPONSE] Status: {} ({}ms)",
            response.status, response_time
        ));
        logs.push(format!(
            "[RESPONSE BODY] {}",
            truncate(&response.text, LOG_BODY_LIMIT)
        ));

        let view = ResponseView {
            status: response.status,
            headers: &response.headers,
            body: &body,
            text: &response.text,
            response_time,
        };
        let assertions: Vec<_> = config
            .assertions
            .iter()
            .map(|assertion| {
                let result = assert::evaluate(assertion, &view);
                if result.passed {
                    logs.push(format!("[ASSERTION PASSED] {}", result.name));
                } else {
                    logs.push(format!(
                        "[ASSERTION FAILED] {}: Expected {}, got {}",
                        result.name, result.expected, result.actual
                    ));
                }
                result
            })
            .collect();

        let all_passed = assertions.iter().all(|a| a.passed);
        tracing::info!(case = case.id, status = response.status, all_passed, "request finished");
        ExecutionResult::verdict(all_passed, started.elapsed())
            .with_message(if all_passed {
                "All assertions passed"
            } else {
                "Some assertions failed"
            })
            .with_assertions(assertions)
            .with_response_data(body)
            .with_logs(logs)
    }

    /// Issue the request, aborting it once the timeout expires.
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, ExecError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| {
                ExecError::Config(format!("Invalid header name `{}`: {}", key, err))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                ExecError::Config(format!("Invalid header value for `{}`: {}", key, err))
            })?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            if !matches!(request.method, Method::GET | Method::HEAD) {
                builder = builder.body(body.clone());
            }
        }

        let started = Instant::now();
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_lowercase(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let elapsed = started.elapsed();
            let text = response.text().await?;
            Ok::<_, ExecError>(RawResponse {
                status,
                headers,
                text,
                elapsed,
            })
        };

        time::timeout(request.timeout, exchange)
            .await
            .map_err(|_| ExecError::Timeout(request.timeout))?
    }
}

impl Runner for HttpRunner {
    fn base(&self) -> &RunnerBase {
        &self.base
    }

    fn run<'a>(&'a self, case: &'a TestCaseConfig) -> BoxFuture<'a, ExecutionResult> {
        Box::pin(self.execute(case))
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Resolve URL, query string, headers and body of a case.
pub fn prepare(
    config: &HttpCaseConfig,
    env: &EnvironmentConfig,
) -> Result<PreparedRequest, ExecError> {
    let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
        .map_err(|err| ExecError::Config(format!("Invalid HTTP method: {}", err)))?;

    let mut url = match &env.base_url {
        Some(base) if !is_absolute(&config.url) => format!("{}{}", base, config.url),
        _ => config.url.clone(),
    };
    url = substitute(&url, &env.variables);

    if !config.params.is_empty() {
        let mut parsed = Url::parse(&url)
            .map_err(|err| ExecError::Config(format!("Invalid URL `{}`: {}", url, err)))?;
        {
            let mut query = parsed.query_pairs_mut();
            for (key, value) in &config.params {
                query.append_pair(key, &substitute(value, &env.variables));
            }
        }
        url = parsed.into();
    }

    let mut headers = env.headers.clone();
    headers.extend(config.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    for value in headers.values_mut() {
        *value = substitute(value, &env.variables);
    }

    let body = match &config.body {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(Value::String(text)) => Some(substitute(text, &env.variables)),
        Some(other) => {
            let has_content_type = headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
            if !has_content_type {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
            }
            Some(serde_json::to_string(other)?)
        }
    };

    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
        timeout: config
            .timeout
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT),
    })
}

fn log_request(request: &PreparedRequest, logs: &mut Vec<String>) {
    logs.push(format!("[REQUEST] {} {}", request.method, request.url));
    logs.push(format!(
        "[HEADERS] {}",
        serde_json::to_string(&request.headers).unwrap_or_default()
    ));
    if let Some(body) = &request.body {
        logs.push(format!("[BODY] {}", truncate(body, LOG_BODY_LIMIT)));
    }
}

/// JSON if the response says so and it parses, raw text otherwise.
fn parse_body(headers: &BTreeMap<String, String>, text: &str) -> Value {
    let is_json = headers
        .get("content-type")
        .map_or(false, |ct| ct.contains("application/json"));
    if is_json {
        if let Ok(value) = serde_json::from_str(text) {
            return value;
        }
    }
    Value::String(text.to_string())
}
