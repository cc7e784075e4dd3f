//! Process-wide session mirror driven by backend auth events.

use crate::phase::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::{SessionError, SessionResult};
use backend_client::{
    AuthChange, AuthChangeKind, Backend, BackendResult, OAuthProvider, OAuthRedirect, Session, User,
};
use data_access::{Profile, ProfileAccess, ProfileInsert, ProfileUpdate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Redirect-back targets handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRedirects {
    /// Where the OAuth provider sends the browser back to
    pub oauth_callback: String,
    /// Link target in password-reset emails
    pub password_reset: String,
}

impl AuthRedirects {
    /// `{site}/auth/callback` and `{site}/auth/reset-password`.
    pub fn from_site_url(site_url: &str) -> Self {
        let site = site_url.trim_end_matches('/');
        Self {
            oauth_callback: format!("{}/auth/callback", site),
            password_reset: format!("{}/auth/reset-password", site),
        }
    }
}

/// What the mirror currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub session: Option<Session>,
}

impl SessionSnapshot {
    fn initializing() -> Self {
        Self {
            phase: SessionPhase::Initializing,
            session: None,
        }
    }
}

/// Where the presentation layer should go after an auth event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationIntent {
    Dashboard,
    Landing,
}

impl NavigationIntent {
    fn for_event(kind: AuthChangeKind) -> Option<Self> {
        match kind {
            AuthChangeKind::SignedIn => Some(NavigationIntent::Dashboard),
            AuthChangeKind::SignedOut => Some(NavigationIntent::Landing),
            _ => None,
        }
    }
}

/// A backend auth event after it has been applied to the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
    pub intent: Option<NavigationIntent>,
}

/// Result of [`SessionSynchronizer::sign_up`].
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: User,
    /// Absent while the email address awaits confirmation
    pub session: Option<Session>,
    /// False when the account exists but its profile row could not be written
    pub profile_created: bool,
}

/// Marks an explicit auth operation as in flight until dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn hold(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Mirrors the backend session and exposes the imperative auth operations.
///
/// The mirror has a single writer: a listener task that performs the initial
/// session fetch and then applies every backend auth event in order. Explicit
/// operations only delegate to the backend, so one may return before the
/// mirror reflects its effect. Callers that need the new state wait on
/// [`SessionSynchronizer::subscribe`] or [`SessionSynchronizer::watch`].
pub struct SessionSynchronizer {
    backend: Arc<dyn Backend>,
    profiles: ProfileAccess,
    redirects: AuthRedirects,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
    busy: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSynchronizer {
    /// Start the listener task. Must be called inside a tokio runtime.
    pub fn start(backend: Arc<dyn Backend>, redirects: AuthRedirects) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initializing());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        // Subscribed before the initial fetch so no event in between is lost.
        let auth_rx = backend.auth_events();
        let listener = tokio::spawn(run_listener(
            backend.clone(),
            auth_rx,
            snapshot_tx,
            events_tx.clone(),
        ));

        Self {
            profiles: ProfileAccess::new(backend.clone()),
            backend,
            redirects,
            snapshot_rx,
            events_tx,
            busy: AtomicBool::new(false),
            listener: Mutex::new(Some(listener)),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.snapshot_rx.borrow().session.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.snapshot_rx.borrow().phase
    }

    /// True until the first session fetch completes, and while an explicit
    /// auth operation is running.
    pub fn is_initializing(&self) -> bool {
        self.phase() == SessionPhase::Initializing || self.busy.load(Ordering::SeqCst)
    }

    /// Auth events as applied to the mirror.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Wait for the first session fetch to complete.
    pub async fn ready(&self) -> SessionSnapshot {
        let mut rx = self.snapshot_rx.clone();
        let ready = rx
            .wait_for(|snapshot| snapshot.phase != SessionPhase::Initializing)
            .await
            .map(|snapshot| snapshot.clone());
        match ready {
            Ok(snapshot) => snapshot,
            Err(_) => rx.borrow().clone(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SessionResult<Session> {
        let _busy = BusyGuard::hold(&self.busy);
        let session = self.backend.sign_in_with_password(email, password).await?;
        info!(user_id = %session.user.id, "Signed in with password");
        Ok(session)
    }

    /// Register an account, then write its profile row.
    ///
    /// `display_name` defaults to the local part of `email`. A failed profile
    /// write is logged and reported through
    /// [`SignUpOutcome::profile_created`]; the account is kept either way.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> SessionResult<SignUpOutcome> {
        let _busy = BusyGuard::hold(&self.busy);
        let display_name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| email_local_part(email));

        let response = self
            .backend
            .sign_up(email, password, json!({ "display_name": display_name }))
            .await?;
        info!(
            user_id = %response.user.id,
            confirmed = response.session.is_some(),
            "Account registered"
        );

        let profile = ProfileInsert::new_free(
            response.user.id.clone(),
            Some(email.to_string()),
            Some(display_name),
        );
        let profile_created = match self.profiles.create(&profile).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    user_id = %response.user.id,
                    error = %e,
                    code = e.code().unwrap_or("none"),
                    "Profile creation after sign-up failed"
                );
                false
            }
        };

        Ok(SignUpOutcome {
            user: response.user,
            session: response.session,
            profile_created,
        })
    }

    /// Ask the backend to end the session. The mirror is cleared by the
    /// resulting `SIGNED_OUT` event, not here.
    pub async fn sign_out(&self) -> SessionResult<()> {
        let _busy = BusyGuard::hold(&self.busy);
        self.backend.sign_out().await?;
        info!("Sign-out requested");
        Ok(())
    }

    /// Provider authorization URL; the session arrives later through the callback.
    pub async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> SessionResult<OAuthRedirect> {
        let _busy = BusyGuard::hold(&self.busy);
        let redirect = self
            .backend
            .oauth_redirect(provider, &self.redirects.oauth_callback)
            .await?;
        debug!(provider = %provider, url = %redirect.url, "OAuth redirect prepared");
        Ok(redirect)
    }

    pub async fn reset_password(&self, email: &str) -> SessionResult<()> {
        let _busy = BusyGuard::hold(&self.busy);
        self.backend
            .reset_password_for_email(email, &self.redirects.password_reset)
            .await?;
        info!("Password reset email requested");
        Ok(())
    }

    /// Set the display name on the signed-in user's profile.
    pub async fn update_profile(&self, display_name: &str) -> SessionResult<Profile> {
        let _busy = BusyGuard::hold(&self.busy);
        let user = self.require_user().await?;
        let patch = ProfileUpdate {
            display_name: Some(display_name.to_string()),
            ..Default::default()
        };
        Ok(self.profiles.update(&user.id, &patch).await?)
    }

    pub async fn sign_in_anonymously(&self) -> SessionResult<Session> {
        let _busy = BusyGuard::hold(&self.busy);
        let session = self.backend.sign_in_anonymously().await?;
        info!(user_id = %session.user.id, "Signed in anonymously");
        Ok(session)
    }

    pub async fn update_password(&self, new_password: &str) -> SessionResult<User> {
        let _busy = BusyGuard::hold(&self.busy);
        Ok(self.backend.update_password(new_password).await?)
    }

    /// Resend the sign-up verification email to the signed-in user.
    pub async fn send_email_verification(&self) -> SessionResult<()> {
        let _busy = BusyGuard::hold(&self.busy);
        let user = self.require_user().await?;
        let email = user.email.ok_or(SessionError::MissingEmail)?;
        self.backend.resend_signup_confirmation(&email).await?;
        info!(user_id = %user.id, "Verification email resent");
        Ok(())
    }

    /// Always fails: removing an account needs the service role.
    pub async fn delete_account(&self) -> SessionResult<()> {
        Err(SessionError::Unsupported(
            "account deletion requires privileged server-side execution",
        ))
    }

    /// Stop applying backend events. The mirror keeps its last value.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
            debug!("Session listener stopped");
        }
    }

    async fn require_user(&self) -> SessionResult<User> {
        self.backend
            .get_user()
            .await?
            .ok_or(SessionError::NotAuthenticated)
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn email_local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Sole writer of the mirror.
async fn run_listener(
    backend: Arc<dyn Backend>,
    mut auth_rx: broadcast::Receiver<AuthChange>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
) {
    let mut machine = SessionMachine::new();

    let initial = fetch_session(backend.as_ref()).await;
    let input = if initial.is_some() {
        SessionMachineInput::RestoredSession
    } else {
        SessionMachineInput::NoSession
    };
    apply(&mut machine, &input, &snapshot_tx, initial);
    info!(phase = %snapshot_tx.borrow().phase, "Initial session resolved");

    loop {
        match auth_rx.recv().await {
            Ok(change) => {
                debug!(event = %change.kind, has_session = change.session.is_some(), "Auth event");
                let input = session_input(change.session.as_ref());
                apply(&mut machine, &input, &snapshot_tx, change.session.clone());

                // Published even when the phase did not change.
                let _ = events_tx.send(SessionEvent {
                    intent: NavigationIntent::for_event(change.kind),
                    kind: change.kind,
                    session: change.session,
                });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Auth events dropped, resynchronizing session");
                let before = snapshot_tx.borrow().phase;
                let session = fetch_session(backend.as_ref()).await;
                let input = session_input(session.as_ref());
                apply(&mut machine, &input, &snapshot_tx, session.clone());

                // Stand in for the sign-in or sign-out that was dropped.
                let after = snapshot_tx.borrow().phase;
                if let Some(kind) = resync_kind(before, after) {
                    let _ = events_tx.send(SessionEvent {
                        intent: NavigationIntent::for_event(kind),
                        kind,
                        session,
                    });
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Auth event stream closed");
                break;
            }
        }
    }
}

async fn fetch_session(backend: &dyn Backend) -> Option<Session> {
    let result: BackendResult<Option<Session>> = backend.get_session().await;
    result.unwrap_or_else(|e| {
        warn!(error = %e, "Session fetch failed, continuing without a session");
        None
    })
}

/// The auth event a resync implies, if the phase changed across it.
fn resync_kind(before: SessionPhase, after: SessionPhase) -> Option<AuthChangeKind> {
    match (before, after) {
        (SessionPhase::Authenticated, SessionPhase::Anonymous) => Some(AuthChangeKind::SignedOut),
        (SessionPhase::Anonymous, SessionPhase::Authenticated) => Some(AuthChangeKind::SignedIn),
        _ => None,
    }
}

fn session_input(session: Option<&Session>) -> SessionMachineInput {
    if session.is_some() {
        SessionMachineInput::SessionStarted
    } else {
        SessionMachineInput::SessionEnded
    }
}

fn apply(
    machine: &mut SessionMachine,
    input: &SessionMachineInput,
    snapshot_tx: &watch::Sender<SessionSnapshot>,
    session: Option<Session>,
) {
    let old_phase = SessionPhase::from(machine.state());
    if machine.consume(input).is_err() {
        warn!(input = ?input, phase = %old_phase, "Ignoring session transition");
        return;
    }
    let phase = SessionPhase::from(machine.state());
    if phase != old_phase {
        debug!(old_phase = %old_phase, new_phase = %phase, "Session phase transition");
    }
    snapshot_tx.send_replace(SessionSnapshot { phase, session });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirects_from_site_url() {
        let redirects = AuthRedirects::from_site_url("http://localhost:3000/");
        assert_eq!(redirects.oauth_callback, "http://localhost:3000/auth/callback");
        assert_eq!(redirects.password_reset, "http://localhost:3000/auth/reset-password");
    }

    #[test]
    fn test_email_local_part() {
        assert_eq!(email_local_part("ada@example.com"), "ada");
        assert_eq!(email_local_part("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_intents() {
        assert_eq!(
            NavigationIntent::for_event(AuthChangeKind::SignedIn),
            Some(NavigationIntent::Dashboard)
        );
        assert_eq!(
            NavigationIntent::for_event(AuthChangeKind::SignedOut),
            Some(NavigationIntent::Landing)
        );
        assert_eq!(NavigationIntent::for_event(AuthChangeKind::TokenRefreshed), None);
        assert_eq!(NavigationIntent::for_event(AuthChangeKind::PasswordRecovery), None);
    }

    #[test]
    fn test_resync_kind_follows_phase_change() {
        use SessionPhase::*;
        assert_eq!(resync_kind(Authenticated, Anonymous), Some(AuthChangeKind::SignedOut));
        assert_eq!(resync_kind(Anonymous, Authenticated), Some(AuthChangeKind::SignedIn));
        assert_eq!(resync_kind(Authenticated, Authenticated), None);
        assert_eq!(resync_kind(Anonymous, Anonymous), None);
    }

    #[test]
    fn test_busy_guard_resets_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = BusyGuard::hold(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
