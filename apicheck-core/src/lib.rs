//! # apicheck core
//!
//! Building blocks of the apicheck HTTP API test harness:
//! - Configuration loading with `${NAME}` placeholder substitution
//! - An HTTP client bound to one environment, with retries
//! - Assertions over responses
//! - Test result reporting into an Allure results directory
//! - A suite runner that shells out to the language test suites
//! - Helpers for test data, JWT claims, polling and JSON comparison
//!
//! ## Architecture (block diagram)
//!
//! ```text
//! +---------------------+      +---------------------+      +---------------------+
//! | config.json         | ---> | ConfigResolver      | ---> | Context             |
//! | + ${NAME} from env  |      | (cached document)   |      | env + resolver      |
//! +---------------------+      +---------------------+      +---------------------+
//!                                                               |            |
//!                                                               v            v
//! +---------------------+      +---------------------+      +---------------------+
//! | assertion::assert_* | <--- | http::Response      | <--- | http::Client        |
//! | Ok / Failure        |      | (immutable record)  |      | base url + retries  |
//! +---------------------+      +---------------------+      +---------------------+
//!            |                          |
//!            v                          v
//! +---------------------+      +---------------------+
//! | reporter::Reporter  | ---> | ResultSink          |
//! | steps, attachments  |      | allure-results/     |
//! +---------------------+      +---------------------+
//! ```
//!
//! Most users should use the `apicheck` crate, which also ships the CLI.

pub mod assertion;
pub mod config;
pub mod context;
pub mod error;
pub mod helpers;
pub mod http;
pub mod masking;
pub mod reporter;
pub mod runner;

pub use assertion::AssertionFailure;
pub use config::{ConfigResolver, EnvironmentConfig, RetryConfig};
pub use context::Context;
pub use error::{Error, Result};
pub use http::{Client, Response};
pub use reporter::{DirectorySink, MemorySink, NullSink, Reporter, ResultSink, Status};
