//! Data-access error types.

use backend_client::BackendError;
use thiserror::Error;

/// Error type for data-access operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// Backend failure, passed through unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A bulk update reached fewer rows than requested
    #[error(
        "Bulk status update applied to {} of {} rows",
        .updated.len(),
        .updated.len() + .missing.len()
    )]
    PartialBulkUpdate {
        updated: Vec<String>,
        missing: Vec<String>,
    },

    /// A row did not match the expected shape
    #[error("Failed to decode {table} row: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    /// A row or patch could not be serialized for the backend
    #[error("Failed to encode {table} row: {source}")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DataError {
    pub(crate) fn decode(table: &str, source: serde_json::Error) -> Self {
        DataError::Decode {
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn encode(table: &str, source: serde_json::Error) -> Self {
        DataError::Encode {
            table: table.to_string(),
            source,
        }
    }

    /// The backend's error code, when the failure came from the backend.
    pub fn code(&self) -> Option<&str> {
        match self {
            DataError::Backend(e) => e.code(),
            _ => None,
        }
    }

    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            DataError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using DataError.
pub type DataResult<T> = Result<T, DataError>;
