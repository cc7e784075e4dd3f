//! Backend error types.

use thiserror::Error;

/// PostgREST code for "zero (or more than one) rows where exactly one was requested".
pub const NOT_FOUND_CODE: &str = "PGRST116";

/// Error reported by the backend or by the transport in front of it.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend answered with an error document.
    ///
    /// `code` is the backend's own code (`PGRST116`, `23505`,
    /// `invalid_credentials`, ...) and is never rewritten by this crate.
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Change-feed protocol error (join rejected, channel closed, ...)
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Session persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] session_storage::StorageError),

    /// The operation needs a signed-in session and there is none
    #[error("Auth session missing")]
    SessionMissing,

    /// Refresh retries exhausted
    #[error("Token refresh failed after {0} attempts")]
    RefreshExhausted(u32),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// The backend answered with something this client cannot interpret
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl BackendError {
    /// Build an API error with just a status, code and message.
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Api {
            status,
            code: Some(code.into()),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    /// The error PostgREST returns when a single-row request matched `rows` rows.
    pub fn not_found(rows: usize) -> Self {
        BackendError::Api {
            status: 406,
            code: Some(NOT_FOUND_CODE.to_string()),
            message: "JSON object requested, multiple (or no) rows returned".to_string(),
            details: Some(format!("The result contains {} rows", rows)),
            hint: None,
        }
    }

    /// Build an API error from a raw error response body.
    ///
    /// Understands both PostgREST documents (`code`, `message`, `details`,
    /// `hint`) and GoTrue documents (`error_code`, `msg`, `error`,
    /// `error_description`). Unparseable bodies keep the HTTP status and a
    /// short summary as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let doc: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(_) => {
                return BackendError::Api {
                    status,
                    code: None,
                    message: format!("HTTP {} ({})", status, summarize_body(body)),
                    details: None,
                    hint: None,
                }
            }
        };

        let text = |key: &str| -> Option<String> {
            match doc.get(key) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                _ => None,
            }
        };

        let code = text("error_code")
            .or_else(|| text("code"))
            .or_else(|| text("error"));
        let message = text("message")
            .or_else(|| text("msg"))
            .or_else(|| text("error_description"))
            .or_else(|| text("error"))
            .unwrap_or_else(|| format!("HTTP {}", status));

        BackendError::Api {
            status,
            code,
            message,
            details: text("details"),
            hint: text("hint"),
        }
    }

    /// The backend's error code, if the backend supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Api { code, .. } => code.as_deref(),
            BackendError::SessionMissing => Some("session_missing"),
            _ => None,
        }
    }

    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Api { status, .. } => Some(*status),
            BackendError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for the single-row not-found error.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(NOT_FOUND_CODE)
    }

    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Timeouts
    /// - Connection failures
    /// - 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout => true,
            BackendError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            BackendError::Api { status, .. } => *status >= 500,
            BackendError::WebSocket(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;

/// Length and digest of a response body, for logs that must not carry the body itself.
pub(crate) fn summarize_body(body: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgrest_document_keeps_code() {
        let body = r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned","details":"The result contains 0 rows","hint":null}"#;
        let err = BackendError::from_response(406, body);

        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(406));
        match err {
            BackendError::Api { details, hint, .. } => {
                assert_eq!(details.as_deref(), Some("The result contains 0 rows"));
                assert!(hint.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_gotrue_document_prefers_error_code() {
        let body = r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#;
        let err = BackendError::from_response(400, body);

        assert_eq!(err.code(), Some("invalid_credentials"));
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[test]
    fn test_oauth_style_document() {
        let body = r#"{"error":"invalid_grant","error_description":"Refresh Token Not Found"}"#;
        let err = BackendError::from_response(400, body);

        assert_eq!(err.code(), Some("invalid_grant"));
        assert_eq!(err.to_string(), "Refresh Token Not Found");
    }

    #[test]
    fn test_unparseable_body_does_not_leak_content() {
        let err = BackendError::from_response(502, "<html>secret upstream page</html>");

        assert!(err.code().is_none());
        assert!(!err.to_string().contains("secret"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_is_transient() {
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::api(503, "unavailable", "down").is_transient());
        assert!(!BackendError::api(400, "invalid_grant", "bad").is_transient());
        assert!(!BackendError::SessionMissing.is_transient());
        assert!(!BackendError::RefreshExhausted(3).is_transient());
    }

    #[test]
    fn test_not_found_constructor() {
        let err = BackendError::not_found(0);
        assert!(err.is_not_found());
        assert_eq!(err.code(), Some(NOT_FOUND_CODE));
    }
}
