//! Startup errors for cam-tool-exchange.
//!
//! These cover loading `config.json` before the server starts. They end the
//! process with a message on stderr. Errors raised while converting tool
//! bits live in [`crate::toolbit::error`] and are reported per tool call.

use std::path::PathBuf;

use thiserror::Error;

/// Why the configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read config {path}: {source}")]
    ReadError {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON or has unknown or mistyped keys.
    #[error("config {path} is not a valid cam-tool-exchange config: {source}")]
    ParseError {
        /// Config file path.
        path: PathBuf,
        /// Underlying JSON error, with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// No file at the given or default location.
    #[error("config file not found: {path}")]
    NotFound {
        /// Where the file was expected.
        path: PathBuf,
    },

    /// A key parsed but holds a value the converter cannot use.
    #[error("invalid config value for '{key}': {message}")]
    ValidationError {
        /// Dotted config key, e.g. `conversion.machine_id`.
        key: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error for a config key.
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            key: key.into(),
            message: message.into(),
        }
    }
}
