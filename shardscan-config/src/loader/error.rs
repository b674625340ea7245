//! Errors raised while loading or validating a configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Neither TOML nor JSON parsing accepted the contents.
    #[error("failed to parse config {origin}: {message}")]
    Parse {
        /// File path or variable the contents came from.
        origin: String,
        /// Parser error text.
        message: String,
    },
    /// A connection URL does not parse.
    #[error("invalid {field} URL")]
    InvalidUrl {
        /// Dotted config field name.
        field: &'static str,
        /// URL parse failure.
        #[source]
        source: url::ParseError,
    },
    /// A value outside its allowed range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted config field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// `.env` exists but could not be loaded.
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
