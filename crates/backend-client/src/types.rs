//! Auth types shared by every backend implementation.

use crate::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An authenticated identity as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl User {
    /// A string value from `user_metadata`.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Credentials plus the identity they belong to.
///
/// Deserializes directly from a GoTrue token response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime of the access token in seconds, as issued
    #[serde(default)]
    pub expires_in: i64,
    /// Expiry as epoch seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Fill in `expires_at` from `expires_in` when the backend omitted it.
    pub fn with_computed_expiry(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(chrono::Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    /// True when the access token expires within `skew_secs` seconds.
    ///
    /// A session without a known expiry never reports itself as expired.
    pub fn expires_within(&self, skew_secs: i64) -> bool {
        match self.expires_at {
            Some(at) => at - chrono::Utc::now().timestamp() < skew_secs,
            None => false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Kind of an auth-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthChangeKind::InitialSession => "INITIAL_SESSION",
            AuthChangeKind::SignedIn => "SIGNED_IN",
            AuthChangeKind::SignedOut => "SIGNED_OUT",
            AuthChangeKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthChangeKind::UserUpdated => "USER_UPDATED",
            AuthChangeKind::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

impl fmt::Display for AuthChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auth-change notification: the kind plus the session after the change.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
}

impl AuthChange {
    pub fn new(kind: AuthChangeKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Result of a sign-up call.
///
/// `session` is absent when the backend requires email confirmation first.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResponse {
    pub user: User,
    pub session: Option<Session>,
}

/// Third-party identity providers supported for redirect sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
    Gitlab,
    Apple,
    Azure,
    Discord,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
            OAuthProvider::Gitlab => "gitlab",
            OAuthProvider::Apple => "apple",
            OAuthProvider::Azure => "azure",
            OAuthProvider::Discord => "discord",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            "gitlab" => Ok(OAuthProvider::Gitlab),
            "apple" => Ok(OAuthProvider::Apple),
            "azure" => Ok(OAuthProvider::Azure),
            "discord" => Ok(OAuthProvider::Discord),
            other => Err(format!("unsupported OAuth provider: {}", other)),
        }
    }
}

/// Where to send the user to start a provider sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub provider: OAuthProvider,
    pub url: url::Url,
}

impl OAuthRedirect {
    /// Build the `/auth/v1/authorize` URL for `provider` on the backend at `base_url`.
    pub fn build(base_url: &str, provider: OAuthProvider, redirect_to: &str) -> BackendResult<Self> {
        let base = url::Url::parse(base_url)?;
        let mut url = base.join("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to);

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BackendError::UnexpectedResponse(format!(
                "authorize URL must be http(s), got {}",
                url.scheme()
            )));
        }

        Ok(Self { provider, url })
    }
}
