//! Common error types for huertbeat

use thiserror::Error;

/// Common result type for huertbeat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across huertbeat crates
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level HTTP failure (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote API answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Hue bridge reported an error entry in its response body
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Authorization failed or no token is available
    #[error("Authorization error: {0}")]
    Auth(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or response value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// HTTP status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
