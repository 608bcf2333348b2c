//! Suite runner.
//!
//! The language suites (pytest, jest, maven, locust) live outside this crate.
//! The runner turns the selected languages and test types into a list of
//! [`Suite`]s, runs each as a child process with `ENVIRONMENT` set, and
//! collects a [`SuiteOutcome`] per suite.
use futures::{stream::FuturesUnordered, StreamExt};
use itertools::Itertools;
use std::{
    path::PathBuf,
    str::FromStr,
    time::{Duration, Instant},
};
use strum::IntoEnumIterator;
use tracing::*;

use crate::{
    config::{self, ConfigResolver, ENVIRONMENT_ENV},
    reporter::ReporterSettings,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown {kind} \"{value}\", expected one of: {expected}")]
    UnknownValue {
        kind: &'static str,
        value: String,
        expected: String,
    },
    #[error(transparent)]
    Config(#[from] config::Error),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Java,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum TestType {
    Functional,
    Integration,
    Security,
    Performance,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Staging,
    Prod,
}

/// Parses a selection, where `all` stands for every value of `T`.
///
/// ```
/// use apicheck_core::runner::{expand, Language};
///
/// assert_eq!(expand::<Language>("java").unwrap(), vec![Language::Java]);
/// assert_eq!(expand::<Language>("all").unwrap().len(), 3);
/// ```
pub fn expand<T>(value: &str) -> Result<Vec<T>, Error>
where
    T: IntoEnumIterator + FromStr + ToString,
{
    if value.eq_ignore_ascii_case("all") {
        return Ok(T::iter().collect());
    }
    T::from_str(&value.to_ascii_lowercase())
        .map(|v| vec![v])
        .map_err(|_| Error::UnknownValue {
            kind: std::any::type_name::<T>()
                .rsplit("::")
                .next()
                .unwrap_or("value"),
            value: value.to_string(),
            expected: T::iter()
                .map(|v| v.to_string())
                .chain(["all".to_string()])
                .join(", "),
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub languages: Vec<Language>,
    pub test_types: Vec<TestType>,
    pub environment: Environment,
    pub report: bool,
    pub parallel: bool,
    pub verbose: bool,
    pub results_dir: PathBuf,
    /// Directory the suites are run from.
    pub root: PathBuf,
    /// Test types turned off in the configuration.
    pub disabled: Vec<TestType>,
    pub load: LoadProfile,
    /// Base URL of the target environment, handed to runners that need it.
    pub host: Option<String>,
}

/// Load shape of the performance suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfile {
    pub users: u64,
    pub spawn_rate: u64,
    /// Locust run time, e.g. `60s` or `2m`. Without it locust never stops.
    pub run_time: String,
}

impl Default for LoadProfile {
    fn default() -> Self {
        LoadProfile {
            users: 50,
            spawn_rate: 10,
            run_time: "60s".to_string(),
        }
    }
}

impl LoadProfile {
    /// Reads `users`, `spawn_rate` and `duration` from the performance
    /// settings. A numeric duration is taken as seconds.
    pub fn from_settings(settings: &serde_json::Value) -> LoadProfile {
        let defaults = LoadProfile::default();
        let run_time = match settings.get("duration") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => format!("{n}s"),
            _ => defaults.run_time,
        };
        LoadProfile {
            users: settings
                .get("users")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(defaults.users),
            spawn_rate: settings
                .get("spawn_rate")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(defaults.spawn_rate),
            run_time,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            languages: Language::iter().collect(),
            test_types: TestType::iter().collect(),
            environment: Environment::default(),
            report: false,
            parallel: false,
            verbose: false,
            results_dir: PathBuf::from(crate::reporter::DEFAULT_RESULTS_DIR),
            root: PathBuf::from("."),
            disabled: Vec::new(),
            load: LoadProfile::default(),
            host: None,
        }
    }
}

impl RunOptions {
    /// Marks the test types whose `test_settings.<type>.enabled` is `false`
    /// as disabled and reads the load profile. Types without settings stay
    /// enabled.
    pub fn apply_test_settings(&mut self, resolver: &ConfigResolver) -> Result<(), Error> {
        let document = resolver.load()?;
        if let Ok(settings) = document.test_settings(&TestType::Performance.to_string()) {
            self.load = LoadProfile::from_settings(settings);
        }
        self.disabled = self
            .test_types
            .iter()
            .copied()
            .filter(|t| {
                document
                    .test_settings(&t.to_string())
                    .ok()
                    .and_then(|s| s.get("enabled"))
                    .and_then(serde_json::Value::as_bool)
                    == Some(false)
            })
            .collect();
        Ok(())
    }

    /// Takes the results directory from `reporting.allure.results_dir`.
    pub fn apply_reporting(&mut self, resolver: &ConfigResolver) -> Result<(), Error> {
        let settings = ReporterSettings::from_reporting(&resolver.reporting_config()?);
        self.results_dir = settings.results_dir;
        Ok(())
    }

    /// Sets `host` to the base URL of the selected environment.
    pub fn apply_environment(&mut self, resolver: &ConfigResolver) -> Result<(), Error> {
        self.host = Some(resolver.base_url(Some(&self.environment.to_string()))?);
        Ok(())
    }
}

/// One external test runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    pub language: Language,
    pub test_type: TestType,
    pub program: String,
    pub args: Vec<String>,
}

impl Suite {
    pub fn name(&self) -> String {
        format!("{} {}", self.language, self.test_type)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .join(" ")
    }
}

fn test_dir(test_type: TestType, language: Language) -> String {
    format!("tests/{test_type}_tests/{language}")
}

const LOCUST_SCRIPT: &str = "tests/performance_tests/locust_scripts/api_load_test.py";

/// Builds the command for one (language, type) pair. Only python has a
/// performance runner.
pub fn suite(language: Language, test_type: TestType, opts: &RunOptions) -> Option<Suite> {
    let dir = test_dir(test_type, language);
    let results_dir = opts.results_dir.display().to_string();

    let (program, args) = match (language, test_type) {
        (Language::Python, TestType::Performance) => {
            let load = &opts.load;
            let mut args = vec![
                "-f".to_string(),
                LOCUST_SCRIPT.to_string(),
                "--headless".to_string(),
                "-u".to_string(),
                load.users.to_string(),
                "-r".to_string(),
                load.spawn_rate.to_string(),
                "--run-time".to_string(),
                load.run_time.clone(),
            ];
            if let Some(host) = &opts.host {
                args.extend(["--host".to_string(), host.clone()]);
            }
            if opts.report {
                args.extend(["--html".to_string(), format!("{results_dir}/locust-report.html")]);
            }
            ("locust", args)
        }
        (_, TestType::Performance) => return None,
        (Language::Python, _) => {
            let mut args = vec![dir];
            if opts.parallel {
                args.extend(["-n".to_string(), "auto".to_string()]);
            }
            if opts.report {
                args.extend(["--alluredir".to_string(), results_dir]);
            }
            if opts.verbose {
                args.push("-v".to_string());
            }
            ("pytest", args)
        }
        (Language::Javascript, _) => {
            let mut args = vec!["jest".to_string(), dir];
            if !opts.parallel {
                args.push("--runInBand".to_string());
            }
            if opts.verbose {
                args.push("--verbose".to_string());
            }
            ("npx", args)
        }
        (Language::Java, _) => {
            let mut args = vec!["test".to_string(), format!("-Dtest=**/{test_type}_tests/**")];
            if opts.parallel {
                args.push("-Dparallel=classes".to_string());
            }
            if !opts.verbose {
                args.push("-q".to_string());
            }
            ("mvn", args)
        }
    };

    Some(Suite {
        language,
        test_type,
        program: program.to_string(),
        args,
    })
}

/// Every suite selected by `opts`, grouped by language.
pub fn plan(opts: &RunOptions) -> Vec<Suite> {
    let mut suites = Vec::new();
    for language in opts.languages.iter().copied().unique() {
        for test_type in opts.test_types.iter().copied().unique() {
            if opts.disabled.contains(&test_type) {
                info!("{test_type} tests are disabled in the configuration, skipping");
                continue;
            }
            match suite(language, test_type, opts) {
                Some(suite) => suites.push(suite),
                None => warn!("{test_type} tests are not available for {language}, skipping"),
            }
        }
    }
    suites
}

#[derive(Debug, Clone)]
pub struct SuiteOutcome {
    pub suite: Suite,
    /// Exit code, `None` when the process was killed by a signal or never
    /// started.
    pub code: Option<i32>,
    /// Set when the process could not be started.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl SuiteOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.code == Some(0)
    }
}

async fn execute(suite: Suite, opts: &RunOptions) -> SuiteOutcome {
    info!("running {}: {}", suite.name(), suite.command_line());
    let started = Instant::now();

    let status = tokio::process::Command::new(&suite.program)
        .args(&suite.args)
        .current_dir(&opts.root)
        .env(ENVIRONMENT_ENV, opts.environment.to_string())
        .kill_on_drop(true)
        .status()
        .await;

    let elapsed = started.elapsed();
    match status {
        Ok(status) => {
            debug!("{} exited with {status}", suite.name());
            SuiteOutcome {
                suite,
                code: status.code(),
                error: None,
                elapsed,
            }
        }
        Err(e) => {
            error!("failed to start {}: {e}", suite.program);
            SuiteOutcome {
                error: Some(format!("failed to start \"{}\": {e}", suite.program)),
                suite,
                code: None,
                elapsed,
            }
        }
    }
}

/// Runs the suites one after another, or all at once when `opts.parallel`.
/// Outcomes are returned in plan order.
pub async fn run(suites: Vec<Suite>, opts: &RunOptions) -> Vec<SuiteOutcome> {
    if !opts.parallel {
        let mut outcomes = Vec::with_capacity(suites.len());
        for suite in suites {
            outcomes.push(execute(suite, opts).await);
        }
        return outcomes;
    }

    let mut handles: FuturesUnordered<_> = suites
        .into_iter()
        .enumerate()
        .map(|(i, suite)| async move { (i, execute(suite, opts).await) })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    while let Some(outcome) = handles.next().await {
        outcomes.push(outcome);
    }
    outcomes
        .into_iter()
        .sorted_by_key(|(i, _)| *i)
        .map(|(_, outcome)| outcome)
        .collect()
}

/// 0 when every suite passed, 1 otherwise.
pub fn exit_code(outcomes: &[SuiteOutcome]) -> i32 {
    if outcomes.iter().all(SuiteOutcome::passed) {
        0
    } else {
        1
    }
}
