use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// The two failure families a fetch can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Malformed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport error"),
            ErrorKind::Malformed => write!(f, "malformed response"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    /// Endpoint unreachable, timed out, or the body could not be read
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Endpoint answered outside 2xx
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Body did not decode into the expected records
    #[error("malformed response from {origin}: {source}")]
    Malformed {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Malformed { .. } | SourceError::Csv { .. } => ErrorKind::Malformed,
            SourceError::Transport { .. }
            | SourceError::Status { .. }
            | SourceError::Io { .. }
            | SourceError::Client(_) => ErrorKind::Transport,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("{field} {date} is outside the available range {min:?} .. {max:?}")]
    OutOfBounds {
        field: &'static str,
        date: NaiveDate,
        min: Option<NaiveDate>,
        max: Option<NaiveDate>,
    },

    #[error("fortnight must be 1 or greater, got {0}")]
    InvalidPeriod(i64),
}
