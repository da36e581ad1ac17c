use std::path::PathBuf;

use thiserror::Error;

use crate::domain::error::DomainError;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Persistence errors raised by the stream and execution journals.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("failed to write journal file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read journal file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt journal record in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("journal write for {what} did not complete after {attempts} attempts")]
    Exhausted { what: String, attempts: u32 },
}

/// Errors raised while talking to an execution adapter.
///
/// Expected venue outcomes (rejections, already-filled orders) are not errors;
/// they travel as [`OrderResult`](crate::port::OrderResult) values.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("adapter call {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("adapter connection unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by bar providers and timetable sources.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path} line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("bar request timed out after {0}ms")]
    Timeout(u64),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
