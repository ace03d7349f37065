//! Error types for bibfuse-core

use thiserror::Error;

/// Result type alias for bibfuse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bibfuse operations
#[derive(Error, Debug)]
pub enum Error {
    /// Record store errors
    #[error("store error: {0}")]
    Store(String),

    /// Source file parse failure in strict mode
    #[error("parse error in {filename}: {message}")]
    Parse { filename: String, message: String },

    /// Configuration file errors
    #[error("config error: {0}")]
    Config(String),

    /// Prior-run snapshot errors
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// The post-resolution fingerprint/identifier mapping is not one-to-one.
    /// Indicates a logic bug in split/merge handling; the run must stop.
    #[error("identity bijection violated: {0}")]
    IdentityBijection(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Snapshot(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
