//! Utilities for writing API tests: random test data, JWT claims, polling
//! and retrying, and JSON comparison and merging.
//!
//! Masking of sensitive JSON fields lives in [`crate::masking::mask_json`].
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{Map, Value};
use std::{fmt, future::Future, time::Duration};
use tracing::*;

use crate::config::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid JWT: {0}")]
    InvalidJwt(String),
}

/// Random ASCII letters and digits.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A random address such as `k3v9x0ab@q2m8zt.com`.
pub fn random_email() -> String {
    format!(
        "{}@{}.com",
        random_string(8).to_ascii_lowercase(),
        random_string(6).to_ascii_lowercase()
    )
}

/// A random North American number in E.164 form, `+1` followed by ten
/// digits. The area code never starts with 0 or 1.
pub fn random_phone() -> String {
    let mut rng = rand::thread_rng();
    let mut phone = format!("+1{}", rng.gen_range(2..=9));
    for _ in 0..9 {
        phone.push(char::from(b'0' + rng.gen_range(0..=9u8)));
    }
    phone
}

pub fn random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Seconds since the Unix epoch.
pub fn timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current time in RFC 3339 form.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Decodes the claims of a JWT. The signature is not verified.
///
/// ```
/// use apicheck_core::helpers::parse_jwt;
///
/// // {"alg":"none"} . {"sub":"42"} .
/// let claims = parse_jwt("eyJhbGciOiJub25lIn0.eyJzdWIiOiI0MiJ9.").unwrap();
/// assert_eq!(claims["sub"], "42");
/// ```
pub fn parse_jwt(token: &str) -> Result<Map<String, Value>, Error> {
    let token = token
        .trim()
        .strip_prefix("Bearer ")
        .unwrap_or(token.trim());
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidJwt("expected three dot-separated parts".into()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::InvalidJwt(format!("payload is not base64url: {e}")))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(Error::InvalidJwt("payload is not a JSON object".into())),
        Err(e) => Err(Error::InvalidJwt(format!("payload is not JSON: {e}"))),
    }
}

/// Polls `condition` every `interval` until it holds or `timeout` passes.
/// The condition is checked at least once.
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            debug!("condition not met within {timeout:?}");
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Runs `f` until it succeeds or the retries of `retry` are used up, and
/// returns the last error then.
pub async fn retry_on_failure<F, Fut, T, E>(f: F, retry: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    use backon::Retryable;

    f.retry(retry.backoff())
        .sleep(tokio::time::sleep)
        .notify(|e: &E, delay: Duration| warn!("retrying in {delay:?} after error: {e}"))
        .await
}

/// Compares two JSON values, skipping `ignore_keys` at the top level of
/// objects.
///
/// ```
/// use apicheck_core::helpers::compare_json;
/// use serde_json::json;
///
/// let a = json!({"id": 1, "updated_at": "2024-01-01"});
/// let b = json!({"id": 1, "updated_at": "2024-06-30"});
/// assert!(compare_json(&a, &b, &["updated_at"]));
/// assert!(!compare_json(&a, &b, &[]));
/// ```
pub fn compare_json(left: &Value, right: &Value, ignore_keys: &[&str]) -> bool {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let keep = |(key, _): &(&String, &Value)| !ignore_keys.contains(&key.as_str());
            l.iter().filter(keep).count() == r.iter().filter(keep).count()
                && l.iter()
                    .filter(keep)
                    .all(|(key, value)| r.get(key) == Some(value))
        }
        _ => left == right,
    }
}

/// Merges `overlay` into `base`. Nested objects are merged key by key; any
/// other value in `overlay` replaces the one in `base` only when
/// `overwrite` is set, or when `base` has no such key.
pub fn merge_json(base: Value, overlay: Value, overwrite: bool) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        let current = existing.take();
                        *existing = merge_json(current, value, overwrite);
                    }
                    Some(existing) => {
                        if overwrite {
                            *existing = value;
                        }
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        (base, overlay) => {
            if overwrite {
                overlay
            } else {
                base
            }
        }
    }
}
