//! Assertion evaluation for `direct-http` cases.
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::case::{Assertion, AssertionKind, Operator};
use crate::errors::ExecError;

use super::results::AssertionResult;

/// The parts of a response assertions can look at.
#[derive(Debug, Clone)]
pub struct ResponseView<'a> {
    pub status: u16,
    /// Header names are lower case.
    pub headers: &'a BTreeMap<String, String>,
    /// Parsed body: JSON when the response declared it, otherwise a string.
    pub body: &'a Value,
    pub text: &'a str,
    /// Milliseconds taken by the request.
    pub response_time: u64,
}

/// Evaluate one assertion. Evaluation errors fail the assertion instead of
/// propagating.
pub fn evaluate(assertion: &Assertion, response: &ResponseView) -> AssertionResult {
    let Assertion {
        kind,
        target,
        operator,
        expected,
        message,
    } = assertion;

    let actual = actual_value(*kind, target.as_deref(), response);
    match compare(*operator, actual.as_ref(), expected) {
        Ok(passed) => AssertionResult {
            name: message.clone().unwrap_or_else(|| {
                let target = target
                    .as_ref()
                    .map(|t| format!("({})", t))
                    .unwrap_or_default();
                format!(
                    "{}{} {} {}",
                    kind.as_str(),
                    target,
                    operator.as_str(),
                    stringify(Some(expected))
                )
            }),
            passed,
            expected: expected.clone(),
            actual: actual.unwrap_or(Value::Null),
            message: None,
        },
        Err(err) => AssertionResult {
            name: message.clone().unwrap_or_else(|| {
                format!(
                    "{} {} {}",
                    kind.as_str(),
                    operator.as_str(),
                    stringify(Some(expected))
                )
            }),
            passed: false,
            expected: expected.clone(),
            actual: Value::String(format!("Error: {}", err)),
            message: None,
        },
    }
}

/// Extract the value an assertion applies to. `None` means undefined.
fn actual_value(
    kind: AssertionKind,
    target: Option<&str>,
    response: &ResponseView,
) -> Option<Value> {
    match kind {
        AssertionKind::Status => Some(Value::from(response.status)),
        AssertionKind::Header => {
            let name = target.unwrap_or_default().to_lowercase();
            response.headers.get(&name).cloned().map(Value::String)
        }
        AssertionKind::JsonPath => json_path(response.body, target.unwrap_or_default()),
        AssertionKind::Contains => Some(Value::String(response.text.to_string())),
        AssertionKind::ResponseTime => Some(Value::from(response.response_time)),
        AssertionKind::Schema => None,
    }
}

/// Apply `operator` to the actual and expected values.
pub fn compare(
    operator: Operator,
    actual: Option<&Value>,
    expected: &Value,
) -> Result<bool, ExecError> {
    Ok(match operator {
        Operator::Eq => actual.map_or(false, |actual| same_value(actual, expected)),
        Operator::Ne => !actual.map_or(false, |actual| same_value(actual, expected)),
        Operator::Gt => numeric(actual, expected, |a, b| a > b),
        Operator::Lt => numeric(actual, expected, |a, b| a < b),
        Operator::Gte => numeric(actual, expected, |a, b| a >= b),
        Operator::Lte => numeric(actual, expected, |a, b| a <= b),
        Operator::Contains => stringify(actual).contains(&stringify(Some(expected))),
        Operator::NotContains => {
            !stringify(actual).contains(&stringify(Some(expected)))
        }
        Operator::Regex => {
            let pattern = stringify(Some(expected));
            let re = Regex::new(&pattern).map_err(|err| {
                ExecError::Config(format!("Invalid regular expression: {}", err))
            })?;
            re.is_match(&stringify(actual))
        }
        Operator::Exists => !matches!(actual, None | Some(Value::Null)),
    })
}

/// Structural equality where numbers compare by value, so `10` and `10.0`
/// are the same.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| same_value(x, y)))
        }
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn numeric<F>(actual: Option<&Value>, expected: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// String form of an operand: strings verbatim, undefined as `undefined`,
/// anything else as JSON text.
pub fn stringify(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Query `value` with a small JSONPath subset:
/// `$`, `$.a.b`, `$.a[0]` and `$.a[*].b`.
pub fn json_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() || path == "$" {
        return Some(value.clone());
    }
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    let parts: Vec<&str> = path
        .split(|c| c == '.' || c == '[' || c == ']')
        .filter(|part| !part.is_empty())
        .collect();
    walk(value, &parts)
}

fn walk(value: &Value, parts: &[&str]) -> Option<Value> {
    let mut current = value;
    for (idx, part) in parts.iter().enumerate() {
        if current.is_null() {
            return None;
        }
        if *part == "*" {
            if let Value::Array(items) = current {
                let rest = &parts[idx + 1..];
                return Some(Value::Array(
                    items
                        .iter()
                        .map(|item| walk(item, rest).unwrap_or(Value::Null))
                        .collect(),
                ));
            }
        }
        current = match (current, part.parse::<usize>()) {
            (Value::Array(items), Ok(index)) => items.get(index)?,
            (Value::Object(map), _) => map.get(*part)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assertion(kind: AssertionKind, target: Option<&str>, operator: Operator, expected: Value) -> Assertion {
        Assertion {
            kind,
            target: target.map(String::from),
            operator,
            expected,
            message: None,
        }
    }

    fn check(assertion: &Assertion, body: &Value) -> AssertionResult {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let text = body.to_string();
        let view = ResponseView {
            status: 200,
            headers: &headers,
            body,
            text: &text,
            response_time: 42,
        };
        evaluate(assertion, &view)
    }

    #[test]
    fn json_path_projects_wildcards() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(json_path(&doc, "$.items[*].id"), Some(json!([1, 2])));
        assert_eq!(json_path(&doc, "$.items[1].id"), Some(json!(2)));
        assert_eq!(json_path(&doc, "$.items[*]"), Some(doc["items"].clone()));
    }

    #[test]
    fn json_path_roots_and_misses() {
        let doc = json!({"a": {"b": null, "0": "zero"}});
        assert_eq!(json_path(&doc, "$"), Some(doc.clone()));
        assert_eq!(json_path(&doc, ""), Some(doc.clone()));
        assert_eq!(json_path(&doc, "$.a.0"), Some(json!("zero")));
        assert_eq!(json_path(&doc, "$.a.b"), Some(Value::Null));
        assert_eq!(json_path(&doc, "$.a.b.c"), None);
        assert_eq!(json_path(&doc, "$.missing.deeper"), None);
        assert_eq!(json_path(&doc, "a"), Some(doc["a"].clone()));
    }

    #[test]
    fn eq_is_deep() {
        let body = json!({"user": {"name": "ada", "tags": ["x"]}});
        let a = assertion(
            AssertionKind::JsonPath,
            Some("$.user"),
            Operator::Eq,
            json!({"tags": ["x"], "name": "ada"}),
        );
        assert!(check(&a, &body).passed);
    }

    #[test]
    fn eq_ignores_integer_float_spelling() {
        let body = json!({"price": 10.0, "items": [{"qty": 2}]});
        let price = assertion(AssertionKind::JsonPath, Some("$.price"), Operator::Eq, json!(10));
        let not_price = assertion(AssertionKind::JsonPath, Some("$.price"), Operator::Ne, json!(10));
        let nested = assertion(AssertionKind::JsonPath, Some("$.items"), Operator::Eq, json!([{"qty": 2.0}]));
        assert!(check(&price, &body).passed);
        assert!(!check(&not_price, &body).passed);
        assert!(check(&nested, &body).passed);

        let status = assertion(AssertionKind::Status, None, Operator::Eq, json!(200.0));
        assert!(check(&status, &body).passed);
        assert!(compare(Operator::Eq, Some(&json!(200u16)), &json!(200.0)).unwrap());
        assert!(!compare(Operator::Eq, Some(&json!(200)), &json!(200.5)).unwrap());
        assert!(!compare(Operator::Eq, None, &Value::Null).unwrap());
        assert!(compare(Operator::Ne, None, &Value::Null).unwrap());
    }

    #[test]
    fn status_and_response_time() {
        let body = json!({});
        let status = assertion(AssertionKind::Status, None, Operator::Eq, json!(200));
        let result = check(&status, &body);
        assert!(result.passed);
        assert_eq!(result.name, "status eq 200");

        let fast = assertion(AssertionKind::ResponseTime, None, Operator::Lt, json!(1000));
        assert!(check(&fast, &body).passed);
        let slow = assertion(AssertionKind::ResponseTime, None, Operator::Gte, json!("43"));
        assert!(!check(&slow, &body).passed);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let a = assertion(
            AssertionKind::Header,
            Some("Content-Type"),
            Operator::Contains,
            json!("json"),
        );
        let result = check(&a, &json!({}));
        assert!(result.passed);
        assert_eq!(result.name, "header(Content-Type) contains json");
    }

    #[test]
    fn contains_and_not_contains_use_text() {
        let body = json!({"greeting": "hello"});
        let yes = assertion(AssertionKind::Contains, None, Operator::Contains, json!("hello"));
        let no = assertion(AssertionKind::Contains, None, Operator::NotContains, json!("bye"));
        assert!(check(&yes, &body).passed);
        assert!(check(&no, &body).passed);
    }

    #[test]
    fn exists_rejects_null_and_missing() {
        let body = json!({"a": null, "b": 0});
        let a = assertion(AssertionKind::JsonPath, Some("$.a"), Operator::Exists, Value::Null);
        let b = assertion(AssertionKind::JsonPath, Some("$.b"), Operator::Exists, Value::Null);
        let c = assertion(AssertionKind::JsonPath, Some("$.c"), Operator::Exists, Value::Null);
        assert!(!check(&a, &body).passed);
        assert!(check(&b, &body).passed);
        assert!(!check(&c, &body).passed);
    }

    #[test]
    fn regex_matches_stringified_actual() {
        let body = json!({"id": 12345});
        let a = assertion(AssertionKind::JsonPath, Some("$.id"), Operator::Regex, json!("^\\d{5}$"));
        assert!(check(&a, &body).passed);
    }

    #[test]
    fn invalid_regex_fails_only_that_assertion() {
        let body = json!({"id": 1});
        let mut a = assertion(AssertionKind::JsonPath, Some("$.id"), Operator::Regex, json!("(unclosed"));
        a.message = Some("id looks right".into());
        let result = check(&a, &body);
        assert!(!result.passed);
        assert_eq!(result.name, "id looks right");
        assert!(result.actual.as_str().unwrap().starts_with("Error: "));
    }

    #[test]
    fn ne_and_numeric_mismatch() {
        let body = json!({"n": "abc"});
        let ne = assertion(AssertionKind::JsonPath, Some("$.n"), Operator::Ne, json!("xyz"));
        let gt = assertion(AssertionKind::JsonPath, Some("$.n"), Operator::Gt, json!(1));
        assert!(check(&ne, &body).passed);
        assert!(!check(&gt, &body).passed);
    }

    #[test]
    fn schema_has_no_actual() {
        let a = assertion(AssertionKind::Schema, None, Operator::Exists, Value::Null);
        let result = check(&a, &json!({}));
        assert!(!result.passed);
        assert_eq!(result.actual, Value::Null);
    }
}
