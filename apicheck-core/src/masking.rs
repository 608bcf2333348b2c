//! Sensitive data masking for logs and report records.
//!
//! Credentials must never reach log output or the results directory. Header
//! values and query parameters with well-known sensitive names are replaced
//! by a fixed mask.

use http::header::{HeaderMap, HeaderValue};
use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

/// The mask string used to replace sensitive values.
pub const MASK: &str = "*****";

/// Query parameter names to mask (case-insensitive comparison).
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "api_key",
    "apikey",
    "token",
    "secret",
    "password",
    "key",
    "auth",
];

/// Header names to mask (case-insensitive comparison).
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "x-auth-token", "cookie"];

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Masks sensitive query parameters in a URL.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use apicheck_core::masking::mask_url;
///
/// let url = Url::parse("https://api.example.com/users?access_token=secret123&name=john").unwrap();
/// let masked = mask_url(&url);
/// assert!(masked.to_string().contains("access_token=*****"));
/// assert!(masked.to_string().contains("name=john"));
/// ```
pub fn mask_url(url: &Url) -> Url {
    let mut masked_url = url.clone();

    let Some(query) = url.query() else {
        return masked_url;
    };

    // Work with the raw query string to preserve the original encoding.
    let masked_query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if SENSITIVE_QUERY_PARAMS.iter().any(|p| p.eq_ignore_ascii_case(key)) => {
                format!("{key}={MASK}")
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");

    masked_url.set_query(Some(&masked_query));
    masked_url
}

/// Masks sensitive header values in a HeaderMap.
///
/// # Examples
///
/// ```
/// use http::header::HeaderMap;
/// use apicheck_core::masking::mask_headers;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("authorization", "Bearer secret".parse().unwrap());
/// headers.insert("content-type", "application/json".parse().unwrap());
///
/// let masked = mask_headers(&headers);
/// assert_eq!(masked.get("authorization").unwrap(), "*****");
/// assert_eq!(masked.get("content-type").unwrap(), "application/json");
/// ```
pub fn mask_headers(headers: &HeaderMap) -> HeaderMap {
    let mut masked = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers.iter() {
        let value = if is_sensitive_header(name.as_str()) {
            HeaderValue::from_static(MASK)
        } else {
            value.clone()
        };
        masked.append(name.clone(), value);
    }

    masked
}

/// Converts headers to a name/value map for report records, masking
/// sensitive values. Repeated headers are joined with `", "`.
pub fn header_record(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut record: IndexMap<String, String> = IndexMap::new();

    for (name, value) in headers.iter() {
        let value = if is_sensitive_header(name.as_str()) {
            MASK.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        record
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    record
}

/// Masks the values of `keys` (case-insensitive) anywhere in a JSON
/// document, e.g. passwords and tokens in a request body.
///
/// ```
/// use apicheck_core::masking::mask_json;
/// use serde_json::json;
///
/// let body = json!({"user": {"name": "a", "password": "hunter2"}});
/// assert_eq!(
///     mask_json(&body, &["password"]),
///     json!({"user": {"name": "a", "password": "*****"}})
/// );
/// ```
pub fn mask_json(value: &Value, keys: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let masked = if keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                        Value::String(MASK.to_string())
                    } else {
                        mask_json(v, keys)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| mask_json(v, keys)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn mask_url_with_sensitive_params() {
        let url =
            Url::parse("https://api.example.com/users?access_token=secret123&name=john").unwrap();
        let masked = mask_url(&url);
        assert!(masked.to_string().contains("access_token=*****"));
        assert!(masked.to_string().contains("name=john"));
    }

    #[test]
    fn mask_url_case_insensitive() {
        let url = Url::parse("https://api.example.com/?ACCESS_TOKEN=secret&API_KEY=key").unwrap();
        let masked = mask_url(&url);
        assert!(masked.to_string().contains("ACCESS_TOKEN=*****"));
        assert!(masked.to_string().contains("API_KEY=*****"));
    }

    #[test]
    fn mask_url_without_query_params() {
        let url = Url::parse("https://api.example.com/users").unwrap();
        assert_eq!(url.to_string(), mask_url(&url).to_string());
    }

    #[test]
    fn mask_url_preserves_encoding() {
        let url =
            Url::parse("https://api.example.com/users?access_token=secret%2Btoken&name=john%20doe")
                .unwrap();
        let masked = mask_url(&url).to_string();
        assert!(masked.contains("access_token=*****"));
        assert!(masked.contains("name=john%20doe"));
    }

    #[test]
    fn mask_url_repeated_keys() {
        let url =
            Url::parse("https://api.example.com/users?token=one&token=two&user=alice").unwrap();
        let masked = mask_url(&url).to_string();
        assert!(masked.contains("token=*****&token=*****"));
        assert!(masked.contains("user=alice"));
    }

    #[test_case("Authorization"; "authorization")]
    #[test_case("X-API-Key"; "api key")]
    #[test_case("cookie"; "cookie")]
    #[test_case("x-auth-token"; "auth token")]
    fn sensitive_header_names(name: &str) {
        assert!(is_sensitive_header(name));
    }

    #[test]
    fn mask_headers_multiple_sensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer token".parse().unwrap());
        headers.insert("x-api-key", "apikey123".parse().unwrap());
        headers.insert("cookie", "session=abc".parse().unwrap());
        headers.insert("accept", "application/json".parse().unwrap());

        let masked = mask_headers(&headers);
        assert_eq!(masked.get("authorization").unwrap(), "*****");
        assert_eq!(masked.get("x-api-key").unwrap(), "*****");
        assert_eq!(masked.get("cookie").unwrap(), "*****");
        assert_eq!(masked.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn header_record_joins_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", "text/html".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer token".parse().unwrap());

        let record = header_record(&headers);
        assert_eq!(record["accept"], "text/html, application/json");
        assert_eq!(record["authorization"], MASK);
    }

    #[test]
    fn mask_json_nested_objects_and_arrays() {
        let body = serde_json::json!({
            "username": "alice",
            "Password": "secret",
            "tokens": [{"access_token": "a", "scope": "read"}],
            "profile": {"api_key": {"nested": "whole subtree"}, "age": 30},
        });

        let masked = mask_json(&body, &["password", "access_token", "api_key"]);
        assert_eq!(
            masked,
            serde_json::json!({
                "username": "alice",
                "Password": MASK,
                "tokens": [{"access_token": MASK, "scope": "read"}],
                "profile": {"api_key": MASK, "age": 30},
            })
        );
        assert_eq!(mask_json(&serde_json::json!("plain"), &["password"]), "plain");
    }
}
