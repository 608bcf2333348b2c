//! Per-process test context.
//!
//! A [`Context`] is built once at start-up and passed to whatever needs
//! configuration. It owns the [`ConfigResolver`] and the resolved
//! environment, and constructs clients and reporters from them.
use std::sync::Arc;

use crate::{
    config::{self, ConfigResolver, EnvironmentConfig},
    http::Client,
    reporter::{Reporter, ReporterSettings, ResultSink},
    Result,
};

#[derive(Debug, Clone)]
pub struct Context {
    resolver: Arc<ConfigResolver>,
    environment: EnvironmentConfig,
}

impl Context {
    /// Resolves `env_name` (or `ENVIRONMENT`, or `dev`) against `resolver`.
    pub fn new(resolver: ConfigResolver, env_name: Option<&str>) -> Result<Context> {
        let environment = resolver.environment(env_name)?;
        Ok(Context {
            resolver: Arc::new(resolver),
            environment,
        })
    }

    /// Context for the config file named by `APICHECK_CONFIG` and the
    /// environment named by `ENVIRONMENT`.
    pub fn from_env() -> Result<Context> {
        Context::new(ConfigResolver::from_env()?, None)
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.environment
    }

    pub fn client(&self) -> Result<Client> {
        Ok(Client::from_environment(&self.environment)?)
    }

    /// A reporter writing to `sink`, configured from the `reporting` section.
    /// Without a `reporting` section the defaults apply.
    pub fn reporter<S: ResultSink>(&self, sink: S) -> Result<Reporter<S>> {
        Ok(Reporter::new(sink, self.reporter_settings()?))
    }

    pub fn reporter_settings(&self) -> Result<ReporterSettings> {
        match self.resolver.reporting_config() {
            Ok(reporting) => Ok(ReporterSettings::from_reporting(&reporting)),
            Err(config::Error::NotFound { .. }) => Ok(ReporterSettings::default()),
            Err(e) => Err(e.into()),
        }
    }
}
