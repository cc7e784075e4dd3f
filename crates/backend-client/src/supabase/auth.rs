//! Auth service calls and local session bookkeeping.

use super::{check_response, SupabaseClient};
use crate::{
    AuthApi, AuthChange, AuthChangeKind, BackendError, BackendResult, OAuthProvider,
    OAuthRedirect, Session, SignUpResponse, User,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use session_storage::{SessionMeta, EXPIRY_SKEW_SECS};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Token refresh request.
#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

impl SupabaseClient {
    /// Access token of the current session, refreshed if it is about to expire.
    pub(super) async fn current_access_token(&self) -> BackendResult<Option<String>> {
        Ok(self.get_session().await?.map(|s| s.access_token))
    }

    /// Make `session` current, announce it as `kind` and persist it.
    ///
    /// A storage failure is logged; the in-memory session stays current.
    async fn install_session(&self, session: Session, kind: AuthChangeKind) {
        *self.session.write().await = Some(session.clone());
        if let Err(e) = self.persist(&session) {
            warn!(user_id = %session.user.id, error = %e, "Failed to persist session");
        }
        self.emit(kind, Some(session));
    }

    fn persist(&self, session: &Session) -> BackendResult<()> {
        let Some(vault) = &self.vault else {
            return Ok(());
        };

        let expires_at = session
            .expires_at
            .and_then(|at| chrono::DateTime::from_timestamp(at, 0))
            .unwrap_or_else(Utc::now)
            .to_rfc3339();

        vault.store_session(
            &session.access_token,
            &session.refresh_token,
            &SessionMeta {
                user_id: session.user.id.clone(),
                email: session.user.email.clone(),
                expires_at,
                project_ref: self.project_ref(),
            },
        )?;
        Ok(())
    }

    async fn clear_local_session(&self) -> BackendResult<()> {
        *self.session.write().await = None;
        if let Some(vault) = &self.vault {
            vault.clear_session()?;
        }
        Ok(())
    }

    /// Rebuild the session from persisted storage.
    ///
    /// An expired token is refreshed. A live token is verified with the auth
    /// service; if the service rejects it the stored session is cleared.
    async fn restore_session(&self) -> BackendResult<Option<Session>> {
        let Some(vault) = &self.vault else {
            return Ok(None);
        };
        if !vault.has_session()? {
            return Ok(None);
        }

        let (Some(access_token), Some(refresh_token), Some(meta)) =
            (vault.access_token()?, vault.refresh_token()?, vault.meta()?)
        else {
            info!("Stored session is incomplete, clearing it");
            vault.clear_session()?;
            return Ok(None);
        };

        if vault.is_expired()? {
            info!(user_id = %meta.user_id, "Stored session expired, attempting refresh");
            return self.refresh_with_backoff(&refresh_token).await.map(Some);
        }

        let user = match self.fetch_user(&access_token).await {
            Ok(user) => user,
            Err(BackendError::Api { status, .. }) if (400..500).contains(&status) => {
                warn!(user_id = %meta.user_id, status, "Stored session rejected by server, clearing it");
                self.clear_local_session().await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let expires_at = chrono::DateTime::parse_from_rfc3339(&meta.expires_at)
            .map(|t| t.timestamp())
            .ok();
        let session = Session {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: expires_at.map_or(0, |at| at - Utc::now().timestamp()),
            expires_at,
            user,
        };

        info!(user_id = %session.user.id, "Session restored from storage");
        *self.session.write().await = Some(session.clone());
        self.emit(AuthChangeKind::InitialSession, Some(session.clone()));
        Ok(Some(session))
    }

    /// Refresh the session with exponential backoff retry.
    ///
    /// Only transient failures are retried. A rejected refresh token ends the
    /// session locally and announces `SIGNED_OUT`.
    async fn refresh_with_backoff(&self, refresh_token: &str) -> BackendResult<Session> {
        let mut last_error = None;

        for attempt in 0..self.refresh_config.max_retries {
            match self.try_refresh(refresh_token).await {
                Ok(session) => {
                    info!(user_id = %session.user.id, "Token refreshed successfully");
                    self.install_session(session.clone(), AuthChangeKind::TokenRefreshed).await;
                    return Ok(session);
                }
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                    if attempt + 1 < self.refresh_config.max_retries {
                        let delay = self.refresh_config.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries = self.refresh_config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Refresh failed with non-transient error, ending session");
                    self.clear_local_session().await?;
                    self.emit(AuthChangeKind::SignedOut, None);
                    return Err(e);
                }
            }
        }

        warn!(attempts = self.refresh_config.max_retries, "Refresh retries exhausted");
        Err(last_error.unwrap_or(BackendError::RefreshExhausted(
            self.refresh_config.max_retries,
        )))
    }

    /// Single attempt to refresh the session.
    async fn try_refresh(&self, refresh_token: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=refresh_token");
        debug!(url = %url, "Refreshing token");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let response = check_response(response, "refresh token").await?;

        let session: Session = response.json().await?;
        Ok(session.with_computed_expiry())
    }

    async fn fetch_user(&self, access_token: &str) -> BackendResult<User> {
        let url = self.auth_url("user");
        debug!(url = %url, "Fetching user");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        let response = check_response(response, "get user").await?;
        Ok(response.json().await?)
    }

    /// Session required by the caller, or [`BackendError::SessionMissing`].
    async fn require_session(&self) -> BackendResult<Session> {
        self.get_session().await?.ok_or(BackendError::SessionMissing)
    }
}

#[async_trait]
impl AuthApi for SupabaseClient {
    async fn get_session(&self) -> BackendResult<Option<Session>> {
        let current = self.session.read().await.clone();
        match current {
            Some(session) if session.expires_within(EXPIRY_SKEW_SECS) => {
                debug!(user_id = %session.user.id, "Session near expiry, refreshing");
                self.refresh_with_backoff(&session.refresh_token)
                    .await
                    .map(Some)
            }
            Some(session) => Ok(Some(session)),
            None => self.restore_session().await,
        }
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_tx.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=password");
        debug!(url = %url, email = %email, "Attempting email/password sign-in");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = check_response(response, "password sign-in").await?;

        let session = response.json::<Session>().await?.with_computed_expiry();
        info!(user_id = %session.user.id, "Sign-in successful");
        self.install_session(session.clone(), AuthChangeKind::SignedIn).await;
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, data: Value) -> BackendResult<SignUpResponse> {
        let url = self.auth_url("signup");
        debug!(url = %url, email = %email, "Signing up");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password, "data": data }))
            .send()
            .await?;
        let response = check_response(response, "sign-up").await?;
        let body: Value = response.json().await?;

        // With email confirmation enabled the service returns the bare user.
        if body.get("access_token").is_some() {
            let session = serde_json::from_value::<Session>(body)?.with_computed_expiry();
            info!(user_id = %session.user.id, "Sign-up successful, session issued");
            self.install_session(session.clone(), AuthChangeKind::SignedIn).await;
            Ok(SignUpResponse {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let user: User = serde_json::from_value(body)?;
            info!(user_id = %user.id, "Sign-up successful, confirmation pending");
            Ok(SignUpResponse {
                user,
                session: None,
            })
        }
    }

    async fn sign_in_anonymously(&self) -> BackendResult<Session> {
        let url = self.auth_url("signup");
        debug!(url = %url, "Signing in anonymously");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "data": {} }))
            .send()
            .await?;
        let response = check_response(response, "anonymous sign-in").await?;

        let session = response.json::<Session>().await?.with_computed_expiry();
        info!(user_id = %session.user.id, "Anonymous sign-in successful");
        self.install_session(session.clone(), AuthChangeKind::SignedIn).await;
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let token = self.session.read().await.as_ref().map(|s| s.access_token.clone());

        if let Some(token) = token {
            let url = self.auth_url("logout");
            debug!(url = %url, "Signing out");

            let response = self
                .http_client
                .post(&url)
                .header("apikey", &self.anon_key)
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await?;

            match check_response(response, "sign-out").await {
                Ok(_) => {}
                // Session already gone server-side
                Err(BackendError::Api { status: 401 | 403 | 404, .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.clear_local_session().await?;
        info!("Signed out");
        self.emit(AuthChangeKind::SignedOut, None);
        Ok(())
    }

    async fn oauth_redirect(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> BackendResult<OAuthRedirect> {
        OAuthRedirect::build(&self.api_url, provider, redirect_to)
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> BackendResult<()> {
        let url = self.auth_url("recover");
        debug!(url = %url, email = %email, "Requesting password recovery");

        let response = self
            .http_client
            .post(&url)
            .query(&[("redirect_to", redirect_to)])
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        check_response(response, "password recovery").await?;
        Ok(())
    }

    async fn get_user(&self) -> BackendResult<Option<User>> {
        match self.current_access_token().await? {
            Some(token) => self.fetch_user(&token).await.map(Some),
            None => Ok(None),
        }
    }

    async fn update_password(&self, new_password: &str) -> BackendResult<User> {
        let mut session = self.require_session().await?;
        let url = self.auth_url("user");
        debug!(url = %url, "Updating password");

        let response = self
            .http_client
            .put(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .json(&json!({ "password": new_password }))
            .send()
            .await?;
        let response = check_response(response, "update password").await?;
        let user: User = response.json().await?;

        session.user = user.clone();
        info!(user_id = %user.id, "Password updated");
        self.install_session(session, AuthChangeKind::UserUpdated).await;
        Ok(user)
    }

    async fn resend_signup_confirmation(&self, email: &str) -> BackendResult<()> {
        let url = self.auth_url("resend");
        debug!(url = %url, email = %email, "Resending sign-up confirmation");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "type": "signup", "email": email }))
            .send()
            .await?;
        check_response(response, "resend confirmation").await?;
        Ok(())
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let refresh_token = match self.session.read().await.as_ref() {
            Some(session) => Some(session.refresh_token.clone()),
            None => None,
        };
        let refresh_token = match refresh_token {
            Some(token) => token,
            None => match &self.vault {
                Some(vault) => vault.refresh_token()?.ok_or(BackendError::SessionMissing)?,
                None => return Err(BackendError::SessionMissing),
            },
        };

        self.refresh_with_backoff(&refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_storage::{MemoryStorage, SecureStorage, SessionVault};
    use std::time::Duration;

    fn client_with_vault() -> SupabaseClient {
        SupabaseClient::new("http://127.0.0.1:9", "anon", Duration::from_millis(200))
            .unwrap()
            .with_vault(SessionVault::new(Box::new(MemoryStorage::new())))
    }

    #[tokio::test]
    async fn test_no_session_without_storage() {
        let client = SupabaseClient::new("http://127.0.0.1:9", "anon", Duration::from_millis(200)).unwrap();
        assert!(client.get_session().await.unwrap().is_none());
        assert!(client.get_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_password_requires_session() {
        let client = client_with_vault();
        assert!(matches!(
            client.update_password("new-secret").await,
            Err(BackendError::SessionMissing)
        ));
        assert!(matches!(
            client.refresh_session().await,
            Err(BackendError::SessionMissing)
        ));
    }

    #[tokio::test]
    async fn test_sign_out_without_session_announces_signed_out() {
        let client = client_with_vault();
        let mut events = client.auth_events();

        client.sign_out().await.unwrap();

        let change = events.recv().await.unwrap();
        assert_eq!(change.kind, AuthChangeKind::SignedOut);
        assert!(change.session.is_none());
    }

    struct ReadOnlyStorage;

    impl SecureStorage for ReadOnlyStorage {
        fn set(&self, _key: &str, _value: &str) -> session_storage::StorageResult<()> {
            Err(session_storage::StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn get(&self, _key: &str) -> session_storage::StorageResult<Option<String>> {
            Ok(None)
        }

        fn delete(&self, _key: &str) -> session_storage::StorageResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_storage_failure_still_announces_session() {
        let client = SupabaseClient::new("http://127.0.0.1:9", "anon", Duration::from_millis(200))
            .unwrap()
            .with_vault(SessionVault::new(Box::new(ReadOnlyStorage)));
        let mut events = client.auth_events();
        let session: Session = serde_json::from_value(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "user": {"id": "user-1", "email": "a@example.com"}
        }))
        .unwrap();

        client.install_session(session.clone(), AuthChangeKind::SignedIn).await;

        let change = events.recv().await.unwrap();
        assert_eq!(change.kind, AuthChangeKind::SignedIn);
        assert_eq!(change.session.as_ref(), Some(&session));
        assert_eq!(client.get_session().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_incomplete_stored_session_is_cleared() {
        let storage = MemoryStorage::new();
        storage
            .set(session_storage::StorageKeys::ACCESS_TOKEN, "orphan")
            .unwrap();
        storage
            .set(
                session_storage::StorageKeys::SESSION_META,
                r#"{"user_id":"u","expires_at":"2999-01-01T00:00:00Z","project_ref":"p"}"#,
            )
            .unwrap();
        let client = SupabaseClient::new("http://127.0.0.1:9", "anon", Duration::from_millis(200))
            .unwrap()
            .with_vault(SessionVault::new(Box::new(storage)));

        assert!(client.get_session().await.unwrap().is_none());
        assert!(client.get_session().await.unwrap().is_none());
    }
}
