//! The backend contract consumed by the data-access and session layers.

use crate::{
    AuthChange, BackendResult, ChangeHandler, FeedSpec, FeedSubscription, OAuthProvider,
    OAuthRedirect, Query, Session, SignUpResponse, User,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Authentication operations.
///
/// Implementations publish every session change on [`AuthApi::auth_events`];
/// callers never need to re-read the session after an operation.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Current session, restoring or refreshing it if needed.
    async fn get_session(&self) -> BackendResult<Option<Session>>;

    /// Subscribe to auth-change notifications.
    fn auth_events(&self) -> broadcast::Receiver<AuthChange>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session>;

    /// Register an account. `data` becomes the user's metadata.
    async fn sign_up(&self, email: &str, password: &str, data: Value) -> BackendResult<SignUpResponse>;

    async fn sign_in_anonymously(&self) -> BackendResult<Session>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Provider authorize URL that sends the user back to `redirect_to`.
    async fn oauth_redirect(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> BackendResult<OAuthRedirect>;

    /// Send a password-recovery email whose link lands on `redirect_to`.
    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> BackendResult<()>;

    /// The signed-in user as the auth service currently sees it.
    async fn get_user(&self) -> BackendResult<Option<User>>;

    async fn update_password(&self, new_password: &str) -> BackendResult<User>;

    /// Re-send the sign-up confirmation email.
    async fn resend_signup_confirmation(&self, email: &str) -> BackendResult<()>;

    async fn refresh_session(&self) -> BackendResult<Session>;
}

/// Row operations on named tables.
///
/// Rows travel as JSON objects; typing happens one layer up.
#[async_trait]
pub trait TableApi: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> BackendResult<Vec<Value>>;

    /// Exactly one row, or the backend's not-found error.
    async fn select_single(&self, table: &str, query: &Query) -> BackendResult<Value>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: Value) -> BackendResult<Value>;

    /// Patch every matching row and return the rows as updated.
    async fn update(&self, table: &str, query: &Query, patch: Value) -> BackendResult<Vec<Value>>;

    /// Patch exactly one row, or fail with the backend's not-found error.
    async fn update_single(&self, table: &str, query: &Query, patch: Value) -> BackendResult<Value>;

    async fn delete(&self, table: &str, query: &Query) -> BackendResult<()>;
}

/// Long-lived change-feed subscriptions.
#[async_trait]
pub trait ChangeFeedApi: Send + Sync {
    /// Start delivering changes matching `spec` to `handler`.
    ///
    /// Delivery continues until the returned handle is unsubscribed or dropped.
    async fn subscribe(&self, spec: FeedSpec, handler: ChangeHandler) -> BackendResult<FeedSubscription>;
}

/// Everything the application needs from a backend.
pub trait Backend: AuthApi + TableApi + ChangeFeedApi {}

impl<T: AuthApi + TableApi + ChangeFeedApi> Backend for T {}
