use apicheck_core::{
    config::{self, ConfigResolver},
    reporter,
    runner::{self, Environment, RunOptions, SuiteOutcome},
};
use clap::{Arg, ArgAction, ArgMatches, Command as ClapCommand};
use console::{style, Term};
use itertools::Itertools;
use std::{path::PathBuf, str::FromStr};
use tracing::*;
use tracing_subscriber::EnvFilter;

/// Build the CLI with clap's builder pattern
fn build_cli() -> ClapCommand {
    ClapCommand::new("apicheck")
        .about("Run the API test suites for the selected languages, test types and environment")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(Arg::new("language")
            .short('l')
            .long("language")
            .help("Language suites to run")
            .value_parser(["python", "javascript", "java", "all"])
            .default_value("all"))
        .arg(Arg::new("type")
            .short('t')
            .long("type")
            .help("Test types to run")
            .value_parser(["functional", "integration", "security", "performance", "all"])
            .default_value("all"))
        .arg(Arg::new("env")
            .short('e')
            .long("env")
            .help("Target environment. Default is $ENVIRONMENT, or \"dev\" when unset")
            .value_parser(["dev", "test", "staging", "prod"]))
        .arg(Arg::new("report")
            .short('r')
            .long("report")
            .help("Write Allure results and print a summary when done")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("parallel")
            .short('p')
            .long("parallel")
            .help("Run suites in parallel")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Verbose output, also sets the log level to debug")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("config")
            .long("config")
            .help(format!("Path to the configuration file. Default is ${} or \"{}\"", config::CONFIG_ENV, config::DEFAULT_CONFIG_PATH))
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("color")
            .long("color")
            .help("Produce color output. Default is \"auto\"")
            .value_parser(["auto", "always", "never"]))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub options: RunOptions,
    pub config: Option<PathBuf>,
    pub color: Color,
}

fn parse_args(matches: &ArgMatches) -> eyre::Result<Invocation> {
    let language = matches
        .get_one::<String>("language")
        .map(String::as_str)
        .unwrap_or("all");
    let test_type = matches
        .get_one::<String>("type")
        .map(String::as_str)
        .unwrap_or("all");
    let environment = match matches.get_one::<String>("env") {
        Some(env) => Environment::from_str(env)?,
        None => {
            let name = config::environment_name(None);
            Environment::from_str(&name)
                .map_err(|_| eyre::eyre!("unknown environment \"{name}\" in ${}", config::ENVIRONMENT_ENV))?
        }
    };

    let options = RunOptions {
        languages: runner::expand(language)?,
        test_types: runner::expand(test_type)?,
        environment,
        report: matches.get_flag("report"),
        parallel: matches.get_flag("parallel"),
        verbose: matches.get_flag("verbose"),
        ..Default::default()
    };

    Ok(Invocation {
        options,
        config: matches.get_one::<PathBuf>("config").cloned(),
        color: matches
            .get_one::<String>("color")
            .and_then(|s| Color::from_str(s).ok())
            .unwrap_or_default(),
    })
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_color(color: &Color) {
    match color {
        Color::Always => {
            console::set_colors_enabled(true);
            console::set_colors_enabled_stderr(true);
        }
        Color::Never => {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        Color::Auto => {}
    }
}

fn outcome_line(outcome: &SuiteOutcome) -> String {
    let elapsed = format!("{:.1}s", outcome.elapsed.as_secs_f64());
    if outcome.passed() {
        format!("{} {} ({elapsed})", style("✓").green(), outcome.suite.name())
    } else {
        let reason = match (&outcome.error, outcome.code) {
            (Some(e), _) => e.clone(),
            (None, Some(code)) => format!("exit code {code}"),
            (None, None) => "terminated by signal".to_string(),
        };
        format!(
            "{} {} ({elapsed}): {reason}",
            style("✘").red(),
            outcome.suite.name()
        )
    }
}

/// Fills in what the configuration file knows: disabled test types, the
/// load profile, the results directory and the environment's base URL.
/// A section that cannot be read leaves the defaults in place.
fn configure(mut options: RunOptions, resolver: &ConfigResolver) -> RunOptions {
    if let Err(e) = options.apply_test_settings(resolver) {
        warn!("running without test settings: {e}");
    }
    if let Err(e) = options.apply_reporting(resolver) {
        warn!("using the default results directory: {e}");
    }
    if let Err(e) = options.apply_environment(resolver) {
        warn!("no base URL for {}: {e}", options.environment);
    }
    options
}

/// apicheck CLI.
#[derive(Debug, Default)]
pub struct App {}

impl App {
    pub fn new() -> App {
        App {}
    }

    /// Parse command-line args and run the selected suites. Returns the
    /// process exit code.
    pub async fn run(self) -> eyre::Result<i32> {
        self.run_from(std::env::args_os()).await
    }

    pub async fn run_from<I, T>(self, args: I) -> eyre::Result<i32>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = build_cli().get_matches_from(args);
        let Invocation {
            options,
            config,
            color,
        } = parse_args(&matches)?;

        init_logging(options.verbose);
        apply_color(&color);
        let term = Term::stdout();

        let resolver = match config {
            Some(path) => ConfigResolver::new(path),
            None => ConfigResolver::from_env()?,
        };
        let options = configure(options, &resolver);

        info!(
            "environment {}, languages [{}], test types [{}]",
            options.environment,
            options.languages.iter().join(", "),
            options.test_types.iter().join(", ")
        );

        let suites = runner::plan(&options);
        if suites.is_empty() {
            term.write_line("no suites to run")?;
            return Ok(0);
        }

        let outcomes = runner::run(suites, &options).await;
        for outcome in &outcomes {
            term.write_line(&outcome_line(outcome))?;
        }

        if options.report {
            match reporter::summarize(&options.results_dir) {
                Ok(summary) => term.write_line(&summary.table())?,
                Err(e) => warn!("no report summary: {e}"),
            }
        }

        let passed = outcomes.iter().filter(|o| o.passed()).count();
        term.write_line(&format!("{passed}/{} suites passed", outcomes.len()))?;

        Ok(runner::exit_code(&outcomes))
    }
}
