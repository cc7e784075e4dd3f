//! Session synchronizer error types.

use backend_client::BackendError;
use data_access::DataError;
use thiserror::Error;

/// Error type for explicit auth operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Backend failure, passed through unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Profile or item access failure, passed through unchanged
    #[error(transparent)]
    Data(#[from] DataError),

    /// The operation needs a signed-in user
    #[error("Not signed in")]
    NotAuthenticated,

    /// The signed-in user has no email address
    #[error("The current user has no email address")]
    MissingEmail,

    /// The operation cannot be performed from a client
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl SessionError {
    /// Machine-readable code: the backend's code where there is one.
    pub fn code(&self) -> Option<&str> {
        match self {
            SessionError::Backend(e) => e.code(),
            SessionError::Data(e) => e.code(),
            SessionError::NotAuthenticated => Some("not_authenticated"),
            SessionError::MissingEmail => Some("missing_email"),
            SessionError::Unsupported(_) => Some("unsupported"),
        }
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_pass_through() {
        let err = SessionError::from(BackendError::api(400, "invalid_credentials", "Invalid login credentials"));
        assert_eq!(err.code(), Some("invalid_credentials"));
        assert_eq!(err.to_string(), "Invalid login credentials");

        let err = SessionError::from(DataError::from(BackendError::api(403, "42501", "denied")));
        assert_eq!(err.code(), Some("42501"));
    }

    #[test]
    fn test_local_codes() {
        assert_eq!(SessionError::NotAuthenticated.code(), Some("not_authenticated"));
        assert_eq!(
            SessionError::Unsupported("nope").to_string(),
            "Unsupported operation: nope"
        );
    }
}
