//! Error types shared by the viewer crates.
//!
//! Per-source fetch failures are deliberately absent here: they are data
//! inside a round report, never errors returned to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for viewer operations.
#[derive(Error, Debug)]
pub enum TcvError {
    /// Configuration file could not be parsed or failed validation.
    #[error("config error: {message}")]
    Config { message: String },

    /// Search form input that cannot become a query.
    #[error("invalid search field '{field}': {message}")]
    InvalidSearch { field: &'static str, message: String },

    /// I/O errors while reading configuration.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON encoding/decoding errors.
    #[error("serialization error: {message}")]
    Serde { message: String },
}

/// A specialized Result type for viewer operations.
pub type Result<T> = std::result::Result<T, TcvError>;

impl TcvError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_search(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSearch {
            field,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TcvError {
    fn from(e: serde_json::Error) -> Self {
        Self::serde(e.to_string())
    }
}
