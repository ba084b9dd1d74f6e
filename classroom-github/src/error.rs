//! Error types for building the GitHub client

use thiserror::Error;

/// Result type for client construction
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that prevent a client from being built
///
/// Failures of individual API calls are reported as
/// [`classroom_core::RemoteError`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unusable token
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Invalid API URL or client settings
    #[error("GitHub client configuration error: {0}")]
    Config(String),

    /// HTTP client could not be created
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("Invalid API URL: {}", err))
    }
}
