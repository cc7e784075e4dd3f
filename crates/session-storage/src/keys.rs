//! Storage key constants.

/// Storage keys used for the persisted session.
pub struct StorageKeys;

impl StorageKeys {
    /// Backend access token (JWT)
    pub const ACCESS_TOKEN: &'static str = "auth_access_token";

    /// Backend refresh token
    pub const REFRESH_TOKEN: &'static str = "auth_refresh_token";

    /// Session metadata (JSON)
    pub const SESSION_META: &'static str = "auth_session_meta";
}
