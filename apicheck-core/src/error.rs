pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error of apicheck. Each component has its own error type; this
/// enum lets test code propagate any of them with `?`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::Error),
    #[error(transparent)]
    Helpers(#[from] crate::helpers::Error),
    #[error(transparent)]
    Http(#[from] crate::http::Error),
    #[error(transparent)]
    Assertion(#[from] crate::assertion::AssertionFailure),
    #[error(transparent)]
    Reporter(#[from] crate::reporter::Error),
    #[error(transparent)]
    Runner(#[from] crate::runner::Error),
}
