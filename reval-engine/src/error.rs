//! Error types for the engine's outer surface (file loading, parameters).
//!
//! The analytical core never fails: data gaps degrade to zeros and
//! exclusions recorded on the output rows.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RevalError {
    #[error("Failed to open '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV parse error in {dataset} at line {line}: {source}")]
    Csv {
        dataset: &'static str,
        line: usize,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid parameters: {0}")]
    Params(#[from] serde_json::Error),
}

/// Result type alias for loader and configuration operations.
pub type RevalResult<T> = Result<T, RevalError>;
