//! Error types for the gridq crate

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed grid header '{header}': {reason}")]
    MalformedHeader { header: String, reason: String },

    #[error("invalid grid: {message}")]
    InvalidGrid { message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("no start cell found after {attempts} attempts (no open cell can reach an episode end)")]
    NoStartCell { attempts: usize },

    #[error("cannot start an episode at ({x}, {y})")]
    InvalidStart { x: i32, y: i32 },

    #[error("no episode is running, call reset() first")]
    EpisodeNotRunning,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            operation: operation.into(),
            source,
        }
    }
}
