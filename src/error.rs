//! Typed errors for the prediction pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a query, or a single location's column when the
/// failure policy isolates model failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Reference table or weather history is missing or has no usable rows.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// The assembled feature matrix does not match what a model was fitted on.
    #[error("Schema mismatch for location {location_id}: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        location_id: i64,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A model failed while scoring a location.
    #[error("Model for location {location_id} failed: {reason}")]
    ModelFailure { location_id: i64, reason: String },

    /// Query parameters outside their valid domain.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Pipeline settings that cannot be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
