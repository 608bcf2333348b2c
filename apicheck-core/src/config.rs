//! # Configuration Module
//!
//! Loads the JSON configuration document, substitutes `${NAME}` placeholders
//! from the process environment and exposes the per-environment and per-test
//! type sections.
//!
//! ## Loading Flow (block diagram)
//!
//! ```text
//! +-------------------+     +-------------------+     +-------------------+
//! | APICHECK_CONFIG   | --> | Path resolution   | --> | config.json file  |
//! | (optional)        |     | or ./config/      |     |                   |
//! +-------------------+     +-------------------+     +-------------------+
//!                                                              |
//!                                                              v
//! +-------------------+     +-------------------+     +-------------------+
//! | serde_json parser | --> | ${NAME} placeholder| -> | ConfigDocument    |
//! |                   |     | substitution      |     | (cached, Arc)     |
//! +-------------------+     +-------------------+     +-------------------+
//!                                                              |
//!                                                              v
//!                           +-------------------+     +-------------------+
//!                           | EnvironmentConfig | <-- | environment(name) |
//!                           | base_url, retry.. |     | ENVIRONMENT / dev |
//!                           +-------------------+     +-------------------+
//! ```
//!
//! ## Configuration Structure
//!
//! ```json
//! {
//!   "environments": {
//!     "dev": {
//!       "base_url": "${API_BASE_URL}",
//!       "timeout": 30000,
//!       "retry_attempts": 3,
//!       "retry_delay": 1000,
//!       "auth": { "client_id": "${DEV_CLIENT_ID}" }
//!     }
//!   },
//!   "test_settings": { "functional": { "enabled": true } },
//!   "reporting": { "allure": { "results_dir": "allure-results" } }
//! }
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apicheck_core::config::ConfigResolver;
//!
//! let resolver = ConfigResolver::from_env()?;
//! let env = resolver.environment(None)?; // $ENVIRONMENT or "dev"
//! println!("{}", env.base_url);
//! ```

pub mod placeholder;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::*;

/// Environment variable name for specifying the config file path.
pub const CONFIG_ENV: &str = "APICHECK_CONFIG";

/// Config file used when `APICHECK_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Environment variable selecting the target environment.
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";

/// Environment used when neither a name nor `ENVIRONMENT` is given.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The config file is missing or unreadable.
    #[error("failed to read config file {path:?}: {message}")]
    Read { path: PathBuf, message: String },
    /// The config file is not valid JSON, or a section has the wrong shape.
    #[error("failed to parse config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    /// The requested environment, test type or section does not exist.
    #[error("{kind} \"{name}\" not found in configuration")]
    NotFound { kind: &'static str, name: String },
}

impl Error {
    fn not_found(kind: &'static str, name: impl Into<String>) -> Error {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }
}

/// Loads the configuration document once and hands out its sections.
///
/// The first successful load is cached for the lifetime of the resolver.
/// Failed loads are not cached, so a later call may succeed once the file is
/// fixed.
#[derive(Debug)]
pub struct ConfigResolver {
    path: PathBuf,
    document: OnceCell<Arc<ConfigDocument>>,
}

impl ConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> ConfigResolver {
        ConfigResolver {
            path: path.into(),
            document: OnceCell::new(),
        }
    }

    /// Builds a resolver from the process environment.
    ///
    /// Loading order:
    /// 1. `.env` in the current directory, if present
    /// 2. If `APICHECK_CONFIG` is set, load from that path
    /// 3. Otherwise, load from `config/config.json`
    pub fn from_env() -> Result<ConfigResolver> {
        let _ = dotenv::dotenv();

        match std::env::var(CONFIG_ENV) {
            Ok(value) => {
                let path = Path::new(&value);

                // Detect misuse: a value that does not look like a file path.
                if path.extension().is_none_or(|ext| ext != "json")
                    && !value.contains(std::path::MAIN_SEPARATOR)
                    && !value.contains('/')
                {
                    return Err(Error::Read {
                        path: path.to_path_buf(),
                        message: format!(
                            "{CONFIG_ENV} should be a path to a config file, not a config value"
                        ),
                    });
                }

                debug!("using config from {CONFIG_ENV}={path:?}");
                Ok(ConfigResolver::new(path))
            }
            Err(_) => Ok(ConfigResolver::new(DEFAULT_CONFIG_PATH)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and caches the configuration document.
    pub fn load(&self) -> Result<Arc<ConfigDocument>> {
        self.document
            .get_or_try_init(|| ConfigDocument::load_from(&self.path).map(Arc::new))
            .cloned()
    }

    /// Returns the configuration of the named environment.
    ///
    /// When `name` is `None`, the `ENVIRONMENT` variable is used, falling back
    /// to `"dev"`.
    pub fn environment(&self, name: Option<&str>) -> Result<EnvironmentConfig> {
        let name = environment_name(name);
        self.load()?.environment(&name)
    }

    pub fn base_url(&self, name: Option<&str>) -> Result<String> {
        Ok(self.environment(name)?.base_url)
    }

    pub fn test_settings(&self, test_type: &str) -> Result<Value> {
        self.load()?.test_settings(test_type).cloned()
    }

    pub fn reporting_config(&self) -> Result<Value> {
        self.load()?.reporting().cloned()
    }

    pub fn mock_config(&self, mock_type: &str) -> Result<Value> {
        self.load()?.mock(mock_type).cloned()
    }

    pub fn logging_config(&self) -> Result<Value> {
        self.load()?.logging().cloned()
    }
}

/// Resolves the environment name: explicit name, then `ENVIRONMENT`, then `"dev"`.
pub fn environment_name(name: Option<&str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None => std::env::var(ENVIRONMENT_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
    }
}

/// A loaded configuration document with every placeholder already resolved.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: PathBuf,
    root: Value,
}

impl ConfigDocument {
    /// Reads, parses and substitutes the document at `path`.
    pub fn load_from(path: &Path) -> Result<ConfigDocument> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            error!("configuration file not found or unreadable: {path:?}");
            Error::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let doc = ConfigDocument::parse(path, &text, |name| std::env::var(name).ok())?;
        debug!("{path:?} was successfully loaded");
        Ok(doc)
    }

    /// Parses a document from text with a custom placeholder lookup.
    pub fn parse(
        path: impl Into<PathBuf>,
        text: &str,
        lookup: impl FnMut(&str) -> Option<String>,
    ) -> Result<ConfigDocument> {
        let path = path.into();
        let root: Value = serde_json::from_str(text).map_err(|e| {
            error!("invalid JSON in configuration file: {path:?}");
            Error::Parse {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;

        if !root.is_object() {
            return Err(Error::Parse {
                path,
                message: "top-level value must be a JSON object".into(),
            });
        }

        Ok(ConfigDocument {
            root: placeholder::substitute_with(root, lookup),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole substituted document.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Names of the configured environments, in document order.
    pub fn environment_names(&self) -> Vec<&str> {
        self.root
            .get("environments")
            .and_then(Value::as_object)
            .map(|envs| envs.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn environment(&self, name: &str) -> Result<EnvironmentConfig> {
        let value = self.entry("environments", name).inspect_err(|_| {
            error!("environment \"{name}\" not found in configuration");
        })?;
        let mut env: EnvironmentConfig = self.deserialize(value, &format!("environments.{name}"))?;
        env.name = name.to_string();
        Ok(env)
    }

    pub fn test_settings(&self, test_type: &str) -> Result<&Value> {
        self.entry("test_settings", test_type)
            .map_err(|_| Error::not_found("test type", test_type))
    }

    pub fn reporting(&self) -> Result<&Value> {
        self.section("reporting")
    }

    pub fn mock(&self, mock_type: &str) -> Result<&Value> {
        self.entry("mocks", mock_type)
            .map_err(|_| Error::not_found("mock type", mock_type))
    }

    pub fn logging(&self) -> Result<&Value> {
        self.section("logging")
    }

    fn section(&self, key: &str) -> Result<&Value> {
        self.root
            .get(key)
            .ok_or_else(|| Error::not_found("section", key))
    }

    fn entry(&self, section: &str, key: &str) -> Result<&Value> {
        self.root
            .get(section)
            .and_then(|s| s.get(key))
            .ok_or_else(|| Error::not_found("environment", key))
    }

    fn deserialize<T: DeserializeOwned>(&self, value: &Value, at: &str) -> Result<T> {
        T::deserialize(value).map_err(|e| Error::Parse {
            path: self.path.clone(),
            message: format!("{at}: {e}"),
        })
    }
}

/// Configuration of one deployment target.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    /// Environment name, taken from the key under `environments`.
    #[serde(skip_deserializing, default)]
    pub name: String,
    pub base_url: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Number of retries after the first attempt on transport failure.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Keys not covered above.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn default_timeout() -> u64 {
    30_000
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

impl EnvironmentConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> EnvironmentConfig {
        EnvironmentConfig {
            name: name.into(),
            base_url: base_url.into(),
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            auth: None,
            logging: None,
            extra: IndexMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            count: self.retry_attempts,
            min_delay: Duration::from_millis(self.retry_delay),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl AuthConfig {
    /// The API key, unless it is missing or still an unresolved placeholder.
    pub fn resolved_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty() && !key.contains("${"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Retry policy for transport failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub count: usize,
    /// Factor to multiply the delay between retries.
    pub factor: f32,
    /// Whether to add jitter to the delay between retries.
    pub jitter: bool,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound of the delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            count: default_retry_attempts(),
            factor: 2.0,
            jitter: false,
            min_delay: Duration::from_millis(default_retry_delay()),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> RetryConfig {
        RetryConfig {
            count: 0,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> backon::ExponentialBuilder {
        let builder = backon::ExponentialBuilder::new()
            .with_max_times(self.count)
            .with_factor(self.factor)
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay);

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}
