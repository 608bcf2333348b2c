//! apicheck's HTTP client is a thin wrapper around `reqwest::Client` that
//! * binds a base URL and a default header set
//! * merges per-call headers over the defaults
//! * retries transport failures with exponential backoff
//! * returns an immutable [`Response`] record from every call
//!
//! A 4xx/5xx status is not an error here. It comes back as a normal
//! [`Response`] and the caller decides with assertions whether it was
//! expected. Use [`Response::error_for_status`] to opt into an error.
use backon::Retryable;
use http::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::*;
use url::Url;

use crate::{
    config::{EnvironmentConfig, RetryConfig},
    masking,
};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network-level failure, surfaced after every retry was used up.
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: usize,
        message: String,
        /// Status and headers, if they arrived before the failure.
        partial: Option<Box<PartialResponse>>,
    },
    /// Non-2xx status, only produced by [`Response::error_for_status`].
    #[error("HTTP status {} returned from {}", .0.status, .0.url)]
    Status(Box<Response>),
    #[error("invalid URL \"{0}\": {1}")]
    InvalidUrl(String, String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("failed to build request: {0}")]
    Build(String),
    #[error("failed to deserialize http response into the specified type: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl Error {
    /// Status code of the failed call, if one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status(res) => Some(res.status),
            Error::Transport {
                partial: Some(partial),
                ..
            } => Some(partial.status),
            _ => None,
        }
    }

    /// The full response of a non-2xx call.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Status(res) => Some(res),
            _ => None,
        }
    }
}

/// Response head received before a transport failure.
#[derive(Debug, Clone)]
pub struct PartialResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// What was sent, kept alongside the response for reporting.
#[derive(Debug, Clone)]
pub struct LogRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// Parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
}

impl Body {
    /// JSON when `text` parses as JSON, raw text otherwise.
    pub fn parse(text: &str) -> Body {
        if text.trim().is_empty() {
            return Body::Text(text.to_string());
        }
        match serde_json::from_str(text) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(text.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Text(_) => None,
        }
    }
}

/// The normalized result of one HTTP call.
#[derive(Debug, Clone)]
pub struct Response {
    pub request: LogRequest,
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// Raw body text.
    pub text: String,
    /// Time spent on the attempt that produced this response.
    pub elapsed: Duration,
    /// Number of attempts, 1 when no retry happened.
    pub attempts: usize,
}

impl Response {
    /// Builds a response record directly, e.g. from a fixture.
    pub fn new(
        request: LogRequest,
        status: StatusCode,
        headers: HeaderMap,
        text: impl Into<String>,
        elapsed: Duration,
    ) -> Response {
        let text = text.into();
        Response {
            url: request.url.clone(),
            request,
            status,
            headers,
            body: Body::parse(&text),
            text,
            elapsed,
            attempts: 1,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value by name (case-insensitive). Non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn json_body(&self) -> Option<&Value> {
        self.body.as_json()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.text)?)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turns a non-2xx response into [`Error::Status`].
    pub fn error_for_status(self) -> Result<Response, Error> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(Error::Status(Box::new(self)))
        }
    }
}

/// Joins a base URL and a path with exactly one separating slash.
///
/// ```
/// use apicheck_core::http::join_url;
///
/// assert_eq!(join_url("https://api.test/", "/users/1"), "https://api.test/users/1");
/// assert_eq!(join_url("https://api.test", "users/1"), "https://api.test/users/1");
/// ```
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// Merges per-call headers over defaults. A per-call header replaces every
/// default value of the same name.
pub fn merge_headers(defaults: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for name in overrides.keys() {
        merged.remove(name);
        for value in overrides.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

/// HTTP client bound to one base URL.
#[derive(Clone, Debug)]
pub struct Client {
    inner: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    /// Authorization value displaced by `set_authorization`, restored by
    /// `clear_authorization`.
    displaced_authorization: Option<Option<HeaderValue>>,
    retry: RetryConfig,
    timeout: Duration,
}

impl Client {
    pub fn new(base_url: impl AsRef<str>) -> Client {
        Client::with_headers(base_url, HeaderMap::new())
    }

    pub fn with_headers(base_url: impl AsRef<str>, headers: HeaderMap) -> Client {
        Client {
            inner: reqwest::Client::new(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            headers,
            displaced_authorization: None,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Builds a client from an environment's base URL, timeout, retry policy
    /// and API key.
    pub fn from_environment(env: &EnvironmentConfig) -> Result<Client, Error> {
        let mut client = Client::new(&env.base_url)
            .with_timeout(env.timeout())
            .with_retry(env.retry());

        if let Some(api_key) = env.auth.as_ref().and_then(|a| a.resolved_api_key()) {
            client.set_header(API_KEY_HEADER, api_key)?;
        }
        Ok(client)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Client {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Client {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current default headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Sets a default header, replacing any existing value.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::try_from(name).map_err(|e| Error::InvalidHeader(e.to_string()))?;
        let mut value =
            HeaderValue::try_from(value).map_err(|e| Error::InvalidHeader(e.to_string()))?;
        value.set_sensitive(masking::is_sensitive_header(name.as_str()));
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Option<HeaderValue> {
        self.headers.remove(name)
    }

    /// Sets `Authorization: <scheme> <token>` on the default headers.
    pub fn set_authorization(&mut self, scheme: &str, token: &str) -> Result<(), Error> {
        let mut value = HeaderValue::try_from(format!("{scheme} {token}"))
            .map_err(|e| Error::InvalidHeader(e.to_string()))?;
        value.set_sensitive(true);

        let previous = self.headers.insert(AUTHORIZATION, value);
        if self.displaced_authorization.is_none() {
            self.displaced_authorization = Some(previous);
        }
        Ok(())
    }

    /// Removes the Authorization header, restoring the value that
    /// `set_authorization` displaced, if any.
    pub fn clear_authorization(&mut self) {
        self.headers.remove(AUTHORIZATION);
        if let Some(Some(previous)) = self.displaced_authorization.take() {
            self.headers.insert(AUTHORIZATION, previous);
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        let error = Url::parse(&url)
            .err()
            .map(|e| Error::InvalidUrl(url.clone(), e.to_string()));

        RequestBuilder {
            inner: self.inner.request(method, &url).timeout(self.timeout),
            defaults: self.headers.clone(),
            headers: HeaderMap::new(),
            retry: self.retry.clone(),
            client: self.inner.clone(),
            error,
        }
    }
}

pub struct RequestBuilder {
    inner: reqwest::RequestBuilder,
    defaults: HeaderMap,
    headers: HeaderMap,
    retry: RetryConfig,
    client: reqwest::Client,
    error: Option<Error>,
}

impl RequestBuilder {
    /// Sets a per-call header. It wins over a default header of the same name.
    pub fn header<K, V>(mut self, key: K, value: V) -> RequestBuilder
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name: Result<HeaderName, http::Error> = HeaderName::try_from(key).map_err(Into::into);
        let value: Result<HeaderValue, http::Error> =
            HeaderValue::try_from(value).map_err(Into::into);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) | (_, Err(e)) => {
                self.error.get_or_insert(Error::InvalidHeader(e.to_string()));
            }
        }
        self
    }

    /// Sets several per-call headers.
    pub fn headers(mut self, headers: HeaderMap) -> RequestBuilder {
        self.headers = merge_headers(&self.headers, &headers);
        self
    }

    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> RequestBuilder {
        self.inner = self.inner.query(query);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> RequestBuilder {
        self.inner = self.inner.json(json);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> RequestBuilder {
        self.inner = self.inner.body(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> RequestBuilder {
        self.inner = self.inner.timeout(timeout);
        self
    }

    /// Sends the request, retrying transport failures.
    pub async fn send(self) -> Result<Response, Error> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let mut request = self.inner.build().map_err(|e| Error::Build(e.to_string()))?;
        let merged = merge_headers(&self.defaults, &self.headers);
        for name in merged.keys() {
            request.headers_mut().remove(name);
        }
        for (name, value) in merged.iter() {
            request.headers_mut().append(name.clone(), value.clone());
        }

        let log_request = LogRequest {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body: request
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        };
        info!(
            "Requesting {} {}",
            log_request.method,
            masking::mask_url(&log_request.url)
        );
        debug!("headers: {:?}", masking::mask_headers(&log_request.headers));

        let client = self.client;
        let mut attempts = 0usize;
        let result = (|| {
            attempts += 1;
            let client = client.clone();
            let request = request.try_clone();
            async move {
                let request = request.ok_or_else(|| Failure {
                    message: "request body cannot be cloned for sending".into(),
                    partial: None,
                    retryable: false,
                })?;
                execute(&client, request).await
            }
        })
        .retry(self.retry.backoff())
        .sleep(tokio::time::sleep)
        .when(|failure: &Failure| failure.retryable)
        .notify(|failure: &Failure, delay: Duration| {
            warn!(
                "transport failure on {}: {}. retrying in {delay:?}",
                masking::mask_url(&log_request.url),
                failure.message
            );
        })
        .await;

        match result {
            Ok((url, status, headers, text, elapsed)) => {
                debug!("{status} from {} in {elapsed:?}", masking::mask_url(&url));
                let mut response = Response::new(log_request, status, headers, text, elapsed);
                response.url = url;
                response.attempts = attempts;
                Ok(response)
            }
            Err(failure) => {
                error!(
                    "request to {} failed after {attempts} attempt(s): {}",
                    masking::mask_url(&log_request.url),
                    failure.message
                );
                Err(Error::Transport {
                    url: masking::mask_url(&log_request.url).to_string(),
                    attempts,
                    message: failure.message,
                    partial: failure.partial,
                })
            }
        }
    }
}

/// A failed attempt.
#[derive(Debug)]
struct Failure {
    message: String,
    partial: Option<Box<PartialResponse>>,
    retryable: bool,
}

impl Failure {
    fn transport(e: reqwest::Error) -> Failure {
        Failure {
            retryable: !(e.is_builder() || e.is_redirect()),
            message: error_chain(&e),
            partial: None,
        }
    }
}

type Received = (Url, StatusCode, HeaderMap, String, Duration);

async fn execute(client: &reqwest::Client, request: reqwest::Request) -> Result<Received, Failure> {
    let started = Instant::now();
    let res = client.execute(request).await.map_err(Failure::transport)?;

    let url = res.url().clone();
    let status = res.status();
    let headers = res.headers().clone();
    let text = res.text().await.map_err(|e| Failure {
        partial: Some(Box::new(PartialResponse {
            status,
            headers: headers.clone(),
        })),
        ..Failure::transport(e)
    })?;

    Ok((url, status, headers, text, started.elapsed()))
}

/// Formats an error with all of its sources, `reqwest` errors hide the
/// interesting part in the chain.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod test {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn no_retry(server: &mockito::Server) -> Client {
        Client::new(server.url()).with_retry(RetryConfig::none())
    }

    #[test_case("https://api.test/", "/users/1", "https://api.test/users/1"; "both slashes")]
    #[test_case("https://api.test", "users/1", "https://api.test/users/1"; "no slashes")]
    #[test_case("https://api.test/", "users/1", "https://api.test/users/1"; "base slash")]
    #[test_case("https://api.test", "/users/1", "https://api.test/users/1"; "path slash")]
    #[test_case("https://api.test/v1//", "//users", "https://api.test/v1/users"; "repeated slashes")]
    #[test_case("https://api.test/v1", "users?page=2", "https://api.test/v1/users?page=2"; "query kept")]
    #[test_case("https://api.test", "", "https://api.test"; "empty path")]
    fn join(base: &str, path: &str, expected: &str) {
        assert_eq!(join_url(base, path), expected);
    }

    #[test]
    fn trailing_slash_is_stripped_from_base_url() {
        let client = Client::new("https://api.test/");
        assert_eq!(client.base_url(), "https://api.test");
        assert_eq!(client.url("/users/1"), "https://api.test/users/1");
    }

    #[test]
    fn merge_prefers_per_call_headers() {
        let mut defaults = HeaderMap::new();
        defaults.insert("accept", "application/json".parse().unwrap());
        defaults.insert("x-trace", "default".parse().unwrap());
        let mut overrides = HeaderMap::new();
        overrides.insert("X-Trace", "call".parse().unwrap());

        let merged = merge_headers(&defaults, &overrides);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["x-trace"], "call");
        assert_eq!(merged["accept"], "application/json");
    }

    #[test]
    fn set_then_clear_authorization_round_trips() -> eyre::Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", "application/json".parse()?);
        let mut client = Client::with_headers("https://api.test", headers.clone());

        client.set_authorization("Bearer", "abc")?;
        assert_eq!(client.headers()[AUTHORIZATION], "Bearer abc");
        client.clear_authorization();
        assert_eq!(client.headers(), &headers);
        Ok(())
    }

    #[test]
    fn clear_authorization_restores_displaced_value() -> eyre::Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwdw==".parse()?);
        let mut client = Client::with_headers("https://api.test", headers.clone());

        client.set_authorization("Bearer", "one")?;
        client.set_authorization("Bearer", "two")?;
        assert_eq!(client.headers()[AUTHORIZATION], "Bearer two");
        client.clear_authorization();
        assert_eq!(client.headers(), &headers);

        // a second clear removes the original value, as nothing is displaced anymore
        client.clear_authorization();
        assert!(client.headers().get(AUTHORIZATION).is_none());
        Ok(())
    }

    #[test]
    fn from_environment_applies_settings() -> eyre::Result<()> {
        let mut env = EnvironmentConfig::new("dev", "https://api.test/");
        env.timeout = 1500;
        env.retry_attempts = 5;
        env.auth = Some(crate::config::AuthConfig {
            api_key: Some("secret".into()),
            ..Default::default()
        });

        let client = Client::from_environment(&env)?;
        assert_eq!(client.base_url(), "https://api.test");
        assert_eq!(client.timeout(), Duration::from_millis(1500));
        assert_eq!(client.retry().count, 5);
        assert_eq!(client.headers()["x-api-key"], "secret");
        Ok(())
    }

    #[test]
    fn from_environment_skips_unresolved_api_key() -> eyre::Result<()> {
        let mut env = EnvironmentConfig::new("dev", "https://api.test");
        env.auth = Some(crate::config::AuthConfig {
            api_key: Some("${API_KEY}".into()),
            ..Default::default()
        });

        let client = Client::from_environment(&env)?;
        assert!(client.headers().get("x-api-key").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn get_joins_base_url_and_parses_json() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":1,"name":"A"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = Client::new(format!("{}/", server.url()));
        let res = client.get("/users/1").send().await?;
        mock.assert_async().await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.url.path(), "/users/1");
        assert_eq!(res.json_body(), Some(&json!({"id": 1, "name": "A"})));
        assert_eq!(res.content_type(), Some("application/json"));
        assert_eq!(res.attempts, 1);

        #[derive(serde::Deserialize)]
        struct User {
            id: u64,
        }
        assert_eq!(res.json::<User>()?.id, 1);
        Ok(())
    }

    #[tokio::test]
    async fn text_body_is_kept_raw() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_body("OK")
            .create_async()
            .await;

        let res = no_retry(&server).get("health").send().await?;
        assert_eq!(res.body(), &Body::Text("OK".into()));
        assert_eq!(res.text(), "OK");
        assert!(res.json_body().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn per_call_headers_override_defaults() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orders")
            .match_header("x-trace", "call")
            .match_header("accept", "application/json")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut client = no_retry(&server);
        client.set_header("accept", "application/json")?;
        client.set_header("x-trace", "default")?;

        let res = client.get("/orders").header("X-Trace", "call").send().await?;
        mock.assert_async().await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.request.headers["x-trace"], "call");
        Ok(())
    }

    #[tokio::test]
    async fn authorization_applies_to_later_calls() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/me")
            .match_header("authorization", "Bearer token-1")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut client = no_retry(&server);
        client.set_authorization("Bearer", "token-1")?;
        let res = client.get("/me").send().await?;
        mock.assert_async().await;
        assert!(res.is_success());
        Ok(())
    }

    #[tokio::test]
    async fn post_sends_json_and_query() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/products")
            .match_query(Matcher::UrlEncoded("dry_run".into(), "true".into()))
            .match_body(Matcher::Json(json!({"name": "Widget", "price": 9.5})))
            .with_status(201)
            .with_body(r#"{"id":42}"#)
            .expect(1)
            .create_async()
            .await;

        let res = no_retry(&server)
            .post("/products")
            .query(&[("dry_run", "true")])
            .json(&json!({"name": "Widget", "price": 9.5}))
            .send()
            .await?;
        mock.assert_async().await;

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.request.method, Method::POST);
        assert!(res.request.body.as_deref().unwrap().contains("Widget"));
        Ok(())
    }

    #[test_case(Method::PUT; "put")]
    #[test_case(Method::PATCH; "patch")]
    #[test_case(Method::DELETE; "delete")]
    #[tokio::test]
    async fn other_verbs(method: Method) -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(method.as_str(), "/users/7")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let client = no_retry(&server);
        let builder = match method {
            Method::PUT => client.put("/users/7").json(&json!({"name": "B"})),
            Method::PATCH => client.patch("/users/7").json(&json!({"name": "B"})),
            _ => client.delete("/users/7"),
        };
        let res = builder.send().await?;
        mock.assert_async().await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn server_error_is_returned_without_retry() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = Client::new(server.url()).with_retry(RetryConfig {
            count: 3,
            min_delay: Duration::from_millis(1),
            ..Default::default()
        });
        let res = client.get("/").send().await?;
        mock.assert_async().await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.attempts, 1);

        let err = res.error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            err.response().and_then(|r| r.json_body()),
            Some(&json!({"error": "boom"}))
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_is_retried_then_surfaced() {
        // Bind and drop a listener to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = Client::new(format!("http://127.0.0.1:{port}")).with_retry(RetryConfig {
            count: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        });
        let err = client.get("/users").send().await.unwrap_err();

        match err {
            Error::Transport {
                attempts, partial, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(partial.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn truncated_body_keeps_the_response_head() -> eyre::Result<()> {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let hits = Arc::new(AtomicUsize::new(0));

        let served = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                served.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                // Promise 100 bytes, send 5 and hang up.
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 100\r\nx-partial: yes\r\n\r\nshort",
                    )
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        let client = Client::new(format!("http://{addr}")).with_retry(RetryConfig {
            count: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        });
        let err = client.get("/x").send().await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        match err {
            Error::Transport {
                attempts, partial, ..
            } => {
                assert_eq!(attempts, 3);
                let partial = partial.expect("response head");
                assert_eq!(partial.status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(partial.headers["x-partial"], "yes");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_header_is_reported_on_send() {
        let client = Client::new("http://127.0.0.1:1");
        let err = client
            .get("/")
            .header("bad header", "value")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)), "{err}");
    }

    #[tokio::test]
    async fn invalid_base_url_is_reported_on_send() {
        let client = Client::new("not a url");
        let err = client.get("/users").send().await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(..)), "{err}");
    }
}
