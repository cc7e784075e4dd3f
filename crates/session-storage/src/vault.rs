//! Typed access to the persisted session.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use serde::{Deserialize, Serialize};

/// Sessions with less than this many seconds left are treated as expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Metadata persisted next to the session tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// User ID from the backend's auth service
    pub user_id: String,
    /// User email, when the identity has one
    #[serde(default)]
    pub email: Option<String>,
    /// When the access token expires (RFC 3339)
    pub expires_at: String,
    /// Project reference the tokens belong to
    pub project_ref: String,
}

/// High-level API over a [`SecureStorage`] for the current session.
pub struct SessionVault {
    storage: Box<dyn SecureStorage>,
}

impl SessionVault {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    pub fn set_access_token(&self, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::ACCESS_TOKEN, token)
    }

    pub fn access_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::ACCESS_TOKEN)
    }

    pub fn set_refresh_token(&self, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::REFRESH_TOKEN, token)
    }

    pub fn refresh_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::REFRESH_TOKEN)
    }

    pub fn set_meta(&self, meta: &SessionMeta) -> StorageResult<()> {
        let json = serde_json::to_string(meta).map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.storage.set(StorageKeys::SESSION_META, &json)
    }

    pub fn meta(&self) -> StorageResult<Option<SessionMeta>> {
        match self.storage.get(StorageKeys::SESSION_META)? {
            Some(json) => {
                let meta: SessionMeta = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    /// True when both an access token and metadata are stored.
    pub fn has_session(&self) -> StorageResult<bool> {
        let has_token = self.storage.has(StorageKeys::ACCESS_TOKEN)?;
        let has_meta = self.storage.has(StorageKeys::SESSION_META)?;
        Ok(has_token && has_meta)
    }

    /// True when no session is stored or it expires within [`EXPIRY_SKEW_SECS`].
    pub fn is_expired(&self) -> StorageResult<bool> {
        match self.meta()? {
            Some(meta) => {
                let expires_at = chrono::DateTime::parse_from_rfc3339(&meta.expires_at)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                let remaining = expires_at.signed_duration_since(chrono::Utc::now());
                Ok(remaining.num_seconds() < EXPIRY_SKEW_SECS)
            }
            None => Ok(true),
        }
    }

    /// Store tokens and metadata in one call.
    pub fn store_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        meta: &SessionMeta,
    ) -> StorageResult<()> {
        self.set_access_token(access_token)?;
        self.set_refresh_token(refresh_token)?;
        self.set_meta(meta)?;
        tracing::debug!(user_id = %meta.user_id, "Session persisted");
        Ok(())
    }

    /// Remove every session key. Missing keys are not an error.
    pub fn clear_session(&self) -> StorageResult<()> {
        self.storage.delete(StorageKeys::ACCESS_TOKEN)?;
        self.storage.delete(StorageKeys::REFRESH_TOKEN)?;
        self.storage.delete(StorageKeys::SESSION_META)?;
        tracing::debug!("Session cleared from storage");
        Ok(())
    }
}
