//! # apicheck - HTTP API test harness
//!
//! apicheck bundles what an API test needs around the request itself:
//! environment-aware configuration, an HTTP client with retries, response
//! assertions and Allure-compatible result reporting. The `apicheck` binary
//! runs the language test suites (pytest, jest, maven, locust) for a chosen
//! environment.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apicheck::{assertion::*, reporter::Status, Context, DirectorySink};
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     let ctx = Context::from_env()?;
//!     let client = ctx.client()?;
//!     let mut reporter = ctx.reporter(DirectorySink::new("allure-results"))?;
//!
//!     reporter.start_test("get user", None)?;
//!     let res = client.get("/users/1").send().await?;
//!     reporter.add_exchange(&res)?;
//!
//!     match assert_status_code(&res, 200).and_then(|_| assert_json_value(&res, "id", 1)) {
//!         Ok(()) => reporter.end_test(Status::Passed)?,
//!         Err(failure) => reporter.end_test_with_message(Status::Failed, &failure)?,
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Command line
//!
//! ```text
//! apicheck -l python -t functional -e staging -r
//! apicheck --language all --type all --parallel
//! ```
//!
//! The process exits with 0 when every suite passed and 1 otherwise.
mod app;

// Re-export error handling crates for user convenience
pub use eyre;
pub use pretty_assertions;

pub use app::{App, Color, Invocation};

pub use apicheck_core::{
    assertion, config, context, helpers, http, masking, reporter, runner, AssertionFailure,
    ConfigResolver, Context, DirectorySink, EnvironmentConfig, Error, MemorySink, NullSink,
    Reporter, Response, Result, ResultSink, Client,
};
