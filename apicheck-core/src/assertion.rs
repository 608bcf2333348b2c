//! Assertions over a [`Response`].
//!
//! Every function is a stateless check that returns `Ok(())` when the
//! expectation holds and an [`AssertionFailure`] otherwise. Returning an
//! error instead of panicking lets test code propagate failures with `?`
//! and lets the reporter record the message as the test's status details.
//!
//! ```
//! use apicheck_core::assertion::{assert_json_value, assert_status_code};
//! # use apicheck_core::http::{LogRequest, Response};
//! # use http::{HeaderMap, Method, StatusCode};
//! # let req = LogRequest { method: Method::GET, url: "https://api.test/users/1".parse().unwrap(), headers: HeaderMap::new(), body: None };
//! # let res = Response::new(req, StatusCode::OK, HeaderMap::new(), r#"{"id":1,"name":"A"}"#, Default::default());
//! assert_status_code(&res, 200).unwrap();
//! assert_json_value(&res, "id", 1).unwrap();
//!
//! let failure = assert_json_value(&res, "id", 2).unwrap_err();
//! assert_eq!(failure.to_string(), "expected 2, got 1");
//! ```
pub mod path;

use regex::Regex;
use serde_json::Value;
use std::time::Duration;

use crate::http::Response;
pub use path::{JsonPath, PathError};

const JSON_CONTENT_TYPE: &str = "application/json";

/// An expectation that did not hold. The message names the expected and the
/// actual value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> AssertionFailure {
        AssertionFailure {
            message: message.into(),
        }
    }
}

impl From<PathError> for AssertionFailure {
    fn from(e: PathError) -> Self {
        AssertionFailure::new(e.to_string())
    }
}

pub type Result<T = ()> = std::result::Result<T, AssertionFailure>;

fn ensure(cond: bool, message: impl FnOnce() -> String) -> Result {
    if cond {
        Ok(())
    } else {
        Err(AssertionFailure::new(message()))
    }
}

fn mismatch(expected: &Value, actual: &Value) -> AssertionFailure {
    AssertionFailure::new(format!("expected {expected}, got {actual}"))
}

pub fn assert_status_code(res: &Response, expected: u16) -> Result {
    let actual = res.status.as_u16();
    ensure(actual == expected, || {
        format!("expected status {expected}, got {actual}")
    })
}

pub fn assert_success(res: &Response) -> Result {
    ensure(res.status.is_success(), || {
        format!("expected a 2xx status, got {}", res.status.as_u16())
    })
}

pub fn assert_client_error(res: &Response) -> Result {
    ensure(res.status.is_client_error(), || {
        format!("expected a 4xx status, got {}", res.status.as_u16())
    })
}

pub fn assert_server_error(res: &Response) -> Result {
    ensure(res.status.is_server_error(), || {
        format!("expected a 5xx status, got {}", res.status.as_u16())
    })
}

/// Header lookups are case-insensitive.
pub fn assert_header_exists(res: &Response, name: &str) -> Result {
    ensure(res.headers.contains_key(name), || {
        format!("expected header \"{name}\" to be present")
    })
}

pub fn assert_header_value(res: &Response, name: &str, expected: &str) -> Result {
    assert_header_exists(res, name)?;
    let actual = res.header(name).unwrap_or_default();
    ensure(actual == expected, || {
        format!("expected header \"{name}\" to be \"{expected}\", got \"{actual}\"")
    })
}

/// Content-Type contains `expected` (case-insensitive).
pub fn assert_content_type(res: &Response, expected: &str) -> Result {
    let Some(actual) = res.content_type() else {
        return Err(AssertionFailure::new(format!(
            "expected content type \"{expected}\", but no Content-Type header was returned"
        )));
    };
    ensure(
        actual.to_ascii_lowercase().contains(&expected.to_ascii_lowercase()),
        || format!("expected content type \"{expected}\", got \"{actual}\""),
    )
}

pub fn assert_json_content_type(res: &Response) -> Result {
    assert_content_type(res, JSON_CONTENT_TYPE)
}

pub fn assert_body_contains(res: &Response, expected: &str) -> Result {
    ensure(res.text.contains(expected), || {
        format!("expected body to contain \"{expected}\"")
    })
}

/// Asserts the body is JSON and returns it.
pub fn assert_json_body(res: &Response) -> Result<&Value> {
    res.json_body()
        .ok_or_else(|| AssertionFailure::new("response body is not valid JSON"))
}

pub fn assert_non_empty_response(res: &Response) -> Result {
    ensure(!res.text.trim().is_empty(), || {
        "expected a non-empty response body".to_string()
    })
}

fn object(res: &Response) -> Result<&serde_json::Map<String, Value>> {
    assert_json_body(res)?
        .as_object()
        .ok_or_else(|| AssertionFailure::new("expected the JSON body to be an object"))
}

/// Key present at the top level of the body.
pub fn assert_json_has_key(res: &Response, key: &str) -> Result {
    ensure(object(res)?.contains_key(key), || {
        format!("expected key \"{key}\" in JSON body")
    })
}

pub fn assert_json_has_keys(res: &Response, keys: &[&str]) -> Result {
    let body = object(res)?;
    let missing: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|key| !body.contains_key(*key))
        .collect();
    ensure(missing.is_empty(), || {
        format!("expected keys {missing:?} in JSON body")
    })
}

/// Deep equality of the top-level value at `key`.
pub fn assert_json_value(res: &Response, key: &str, expected: impl Into<Value>) -> Result {
    let expected = expected.into();
    assert_json_has_key(res, key)?;
    let actual = &object(res)?[key];
    if *actual == expected {
        Ok(())
    } else {
        Err(mismatch(&expected, actual))
    }
}

/// Checks every key of the `expected` object against the body.
pub fn assert_json_values(res: &Response, expected: &Value) -> Result {
    let expected = expected
        .as_object()
        .ok_or_else(|| AssertionFailure::new("expected values must be a JSON object"))?;
    for (key, value) in expected {
        assert_json_value(res, key, value.clone())
            .map_err(|e| AssertionFailure::new(format!("{key}: {e}")))?;
    }
    Ok(())
}

fn at_path<'a>(res: &'a Response, path: &str) -> Result<&'a Value> {
    let body = assert_json_body(res)?;
    let parsed = JsonPath::parse(path)?;
    parsed
        .lookup(body)
        .ok_or_else(|| AssertionFailure::new(format!("path \"{path}\" not found in JSON body")))
}

fn list_at<'a>(res: &'a Response, path: &str) -> Result<&'a Vec<Value>> {
    let node = at_path(res, path)?;
    node.as_array().ok_or_else(|| {
        AssertionFailure::new(format!("expected a list at \"{path}\", got {node}"))
    })
}

pub fn assert_json_path_value(res: &Response, path: &str, expected: impl Into<Value>) -> Result {
    let expected = expected.into();
    let actual = at_path(res, path)?;
    if *actual == expected {
        Ok(())
    } else {
        Err(mismatch(&expected, actual))
    }
}

pub fn assert_json_list_length(res: &Response, path: &str, expected: usize) -> Result {
    let actual = list_at(res, path)?.len();
    ensure(actual == expected, || {
        format!("expected list \"{path}\" to have length {expected}, got {actual}")
    })
}

pub fn assert_json_list_contains(res: &Response, path: &str, item: impl Into<Value>) -> Result {
    let item = item.into();
    ensure(list_at(res, path)?.contains(&item), || {
        format!("expected list \"{path}\" to contain {item}")
    })
}

/// Some element of the list at `path` is an object carrying every key/value
/// pair of `partial`.
pub fn assert_json_list_contains_object(res: &Response, path: &str, partial: &Value) -> Result {
    let partial = partial
        .as_object()
        .ok_or_else(|| AssertionFailure::new("expected a JSON object to match against"))?;
    let found = list_at(res, path)?.iter().any(|item| {
        item.as_object().is_some_and(|item| {
            partial
                .iter()
                .all(|(key, value)| item.get(key) == Some(value))
        })
    });
    ensure(found, || {
        format!(
            "list \"{path}\" doesn't contain an object with the key-value pairs {}",
            Value::Object(partial.clone())
        )
    })
}

pub fn assert_json_matches_schema(res: &Response, schema: &Value) -> Result {
    let body = assert_json_body(res)?;
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| AssertionFailure::new(format!("invalid JSON schema: {e}")))?;
    let messages: Vec<String> = validator.iter_errors(body).map(|e| e.to_string()).collect();
    ensure(messages.is_empty(), || {
        format!("JSON does not match schema: {}", messages.join("; "))
    })
}

pub fn assert_response_time(res: &Response, max: Duration) -> Result {
    ensure(res.elapsed <= max, || {
        format!(
            "expected response time <= {}ms, got {}ms",
            max.as_millis(),
            res.elapsed.as_millis()
        )
    })
}

/// `text` matches `pattern` at its start.
pub fn assert_regex_match(text: &str, pattern: &str) -> Result {
    let regex = Regex::new(pattern)
        .map_err(|e| AssertionFailure::new(format!("invalid pattern '{pattern}': {e}")))?;
    ensure(
        regex.find(text).is_some_and(|m| m.start() == 0),
        || format!("text \"{text}\" does not match pattern '{pattern}'"),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::LogRequest;
    use http::{HeaderMap, Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn response(status: u16, content_type: Option<&str>, body: &str) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert("content-type", content_type.parse().unwrap());
        }
        headers.insert("x-request-id", "abc-123".parse().unwrap());
        let request = LogRequest {
            method: Method::GET,
            url: "https://api.test/users".parse().unwrap(),
            headers: HeaderMap::new(),
            body: None,
        };
        Response::new(
            request,
            StatusCode::from_u16(status).unwrap(),
            headers,
            body,
            Duration::from_millis(120),
        )
    }

    fn json_response(body: Value) -> Response {
        response(200, Some("application/json"), &body.to_string())
    }

    #[test_case(200, 200, true; "equal")]
    #[test_case(201, 200, false; "created is not ok")]
    #[test_case(404, 200, false; "not found")]
    fn status_code(actual: u16, expected: u16, holds: bool) {
        let res = response(actual, None, "");
        let result = assert_status_code(&res, expected);
        assert_eq!(result.is_ok(), holds);
        if let Err(e) = result {
            assert!(e.message.contains(&expected.to_string()));
            assert!(e.message.contains(&actual.to_string()));
        }
    }

    #[test_case(204, true, false, false; "no content")]
    #[test_case(422, false, true, false; "unprocessable")]
    #[test_case(503, false, false, true; "unavailable")]
    fn status_classes(status: u16, success: bool, client: bool, server: bool) {
        let res = response(status, None, "");
        assert_eq!(assert_success(&res).is_ok(), success);
        assert_eq!(assert_client_error(&res).is_ok(), client);
        assert_eq!(assert_server_error(&res).is_ok(), server);
    }

    #[test]
    fn headers() {
        let res = response(200, Some("application/json"), "{}");
        assert!(assert_header_exists(&res, "X-Request-Id").is_ok());
        assert!(assert_header_exists(&res, "etag").is_err());
        assert!(assert_header_value(&res, "x-request-id", "abc-123").is_ok());
        assert_eq!(
            assert_header_value(&res, "x-request-id", "other")
                .unwrap_err()
                .message,
            "expected header \"x-request-id\" to be \"other\", got \"abc-123\""
        );
    }

    #[test_case(Some("application/json"), true; "plain")]
    #[test_case(Some("Application/JSON; charset=utf-8"), true; "case and params")]
    #[test_case(Some("text/html"), false; "html")]
    #[test_case(None, false; "missing")]
    fn json_content_type(content_type: Option<&str>, holds: bool) {
        let res = response(200, content_type, "{}");
        assert_eq!(assert_json_content_type(&res).is_ok(), holds);
    }

    #[test]
    fn body_checks() {
        let res = response(200, Some("text/plain"), "hello world");
        assert!(assert_body_contains(&res, "world").is_ok());
        assert!(assert_body_contains(&res, "mars").is_err());
        assert!(assert_non_empty_response(&res).is_ok());
        assert!(assert_json_body(&res).is_err());

        let empty = response(204, None, "  ");
        assert!(assert_non_empty_response(&empty).is_err());
    }

    #[test]
    fn null_is_a_json_body() {
        let res = response(200, Some("application/json"), "null");
        assert_eq!(assert_json_body(&res), Ok(&Value::Null));
        assert_eq!(
            assert_json_has_key(&res, "id").unwrap_err().message,
            "expected the JSON body to be an object"
        );
    }

    #[test]
    fn json_value_reports_expected_and_actual() {
        let res = json_response(json!({"id": 1, "name": "A"}));
        assert!(assert_json_value(&res, "id", 1).is_ok());
        assert!(assert_json_value(&res, "name", "A").is_ok());
        assert_eq!(
            assert_json_value(&res, "id", 2).unwrap_err(),
            AssertionFailure::new("expected 2, got 1")
        );
        assert_eq!(
            assert_json_value(&res, "email", "a@b").unwrap_err().message,
            "expected key \"email\" in JSON body"
        );
    }

    #[test]
    fn json_keys_and_values() {
        let res = json_response(json!({"id": 1, "name": "A", "tags": ["x"]}));
        assert!(assert_json_has_keys(&res, &["id", "name"]).is_ok());
        assert_eq!(
            assert_json_has_keys(&res, &["id", "email", "phone"])
                .unwrap_err()
                .message,
            r#"expected keys ["email", "phone"] in JSON body"#
        );
        assert!(assert_json_values(&res, &json!({"id": 1, "tags": ["x"]})).is_ok());
        assert_eq!(
            assert_json_values(&res, &json!({"id": 1, "name": "B"}))
                .unwrap_err()
                .message,
            r#"name: expected "B", got "A""#
        );
    }

    #[test]
    fn json_has_key_on_array_body() {
        let res = json_response(json!([1, 2]));
        assert_eq!(
            assert_json_has_key(&res, "id").unwrap_err().message,
            "expected the JSON body to be an object"
        );
    }

    #[test]
    fn lists() {
        let res = json_response(json!({
            "data": {
                "items": [
                    {"id": 1, "status": "open", "total": 10},
                    {"id": 2, "status": "closed", "total": 20},
                ],
                "codes": ["a", "b"],
            }
        }));

        assert!(assert_json_path_value(&res, "data.items[1].status", "closed").is_ok());
        assert!(assert_json_list_length(&res, "data.items", 2).is_ok());
        assert_eq!(
            assert_json_list_length(&res, "data.items", 3)
                .unwrap_err()
                .message,
            "expected list \"data.items\" to have length 3, got 2"
        );
        assert!(assert_json_list_length(&res, "data.items[0].id", 1).is_err());
        assert!(assert_json_list_contains(&res, "data.codes", "b").is_ok());
        assert!(assert_json_list_contains(&res, "data.codes", "c").is_err());
        assert!(
            assert_json_list_contains_object(&res, "data.items", &json!({"id": 2, "status": "closed"}))
                .is_ok()
        );
        assert!(
            assert_json_list_contains_object(&res, "data.items", &json!({"id": 2, "status": "open"}))
                .is_err()
        );
        assert_eq!(
            assert_json_list_length(&res, "data.missing", 0)
                .unwrap_err()
                .message,
            "path \"data.missing\" not found in JSON body"
        );
    }

    #[test]
    fn root_list_path() {
        let res = json_response(json!([{"name": "a"}, {"name": "b"}, {"name": "c"}]));
        assert!(assert_json_list_length(&res, "", 3).is_ok());
        assert!(assert_json_path_value(&res, "[2].name", "c").is_ok());
    }

    #[test]
    fn invalid_path_is_a_failure() {
        let res = json_response(json!({"a": 1}));
        let err = assert_json_path_value(&res, "a..b", 1).unwrap_err();
        assert!(err.message.starts_with("invalid path \"a..b\""));
    }

    #[test]
    fn schema() {
        let schema = json!({
            "type": "object",
            "required": ["id", "name"],
            "properties": {
                "id": {"type": "integer"},
                "name": {"type": "string"},
            }
        });
        assert!(assert_json_matches_schema(&json_response(json!({"id": 1, "name": "A"})), &schema).is_ok());

        let err = assert_json_matches_schema(&json_response(json!({"id": "1"})), &schema).unwrap_err();
        assert!(err.message.starts_with("JSON does not match schema"));
    }

    #[test]
    fn response_time() {
        let res = response(200, None, "");
        assert!(assert_response_time(&res, Duration::from_millis(120)).is_ok());
        assert_eq!(
            assert_response_time(&res, Duration::from_millis(100))
                .unwrap_err()
                .message,
            "expected response time <= 100ms, got 120ms"
        );
    }

    #[test_case("ORD-1234", r"ORD-\d+", true; "matches")]
    #[test_case("id ORD-1234", r"ORD-\d+", false; "anchored at start")]
    #[test_case("abc", r"[", false; "invalid pattern")]
    fn regex(text: &str, pattern: &str, holds: bool) {
        assert_eq!(assert_regex_match(text, pattern).is_ok(), holds);
    }
}
