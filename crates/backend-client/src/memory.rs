//! In-process backend with the same observable contract as the hosted one.
//!
//! Rows live in per-table vectors, auth users in a map keyed by email. Every
//! write is published on the change feed. Tests can register owner columns
//! to emulate row-level security and queue one-shot failures per operation.

use crate::{
    AuthApi, AuthChange, AuthChangeKind, BackendError, BackendResult, ChangeEvent, ChangeFeedApi,
    ChangeHandler, ChangeKind, FeedSpec, FeedSubscription, OAuthProvider, OAuthRedirect, Query,
    Session, SignUpResponse, TableApi, User,
};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:54321";
const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
const MIN_PASSWORD_LEN: usize = 6;

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    GetSession,
    SignIn,
    SignUp,
    SignInAnonymously,
    SignOut,
    OAuthRedirect,
    ResetPassword,
    GetUser,
    UpdatePassword,
    ResendConfirmation,
    RefreshSession,
    Select,
    Insert,
    Update,
    Delete,
    Subscribe,
}

/// Kind of email the auth service would have sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Confirmation,
    Recovery,
}

/// An email recorded instead of being sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub kind: MailKind,
    pub email: String,
    pub redirect_to: Option<String>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: BackendOp,
    table: Option<String>,
    status: u16,
    code: String,
    message: String,
}

#[derive(Debug, Clone)]
struct AccountRecord {
    user: User,
    password: String,
    confirmed: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, AccountRecord>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Value>>,
    owners: HashMap<String, String>,
    enforce_ownership: bool,
    key_only_deletes: bool,
    require_confirmation: bool,
    faults: Vec<Fault>,
    mail: Vec<SentMail>,
    last_timestamp_micros: i64,
}

impl State {
    fn take_fault(&mut self, op: BackendOp, table: Option<&str>) -> Option<BackendError> {
        let index = self.faults.iter().position(|f| {
            f.op == op && f.table.as_deref().map_or(true, |t| Some(t) == table)
        })?;
        let fault = self.faults.remove(index);
        debug!(op = ?fault.op, code = %fault.code, "Injected backend failure");
        Some(BackendError::api(fault.status, fault.code, fault.message))
    }

    /// Strictly increasing RFC 3339 timestamps, so ordering by creation is stable.
    fn next_timestamp(&mut self) -> String {
        let now = Utc::now().timestamp_micros();
        let micros = now.max(self.last_timestamp_micros + 1);
        self.last_timestamp_micros = micros;

        let secs = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        chrono::DateTime::from_timestamp(secs, nanos)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn viewer(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.user.id.clone())
    }

    /// Whether the current session may see (and therefore touch) `row`.
    fn visible(&self, table: &str, row: &Value) -> bool {
        if !self.enforce_ownership {
            return true;
        }
        let Some(column) = self.owners.get(table) else {
            return true;
        };
        match (self.viewer(), row.get(column).and_then(|v| v.as_str())) {
            (Some(viewer), Some(owner)) => viewer == owner,
            _ => false,
        }
    }

    fn check_write(&self, table: &str, row: &Value) -> BackendResult<()> {
        if self.visible(table, row) {
            Ok(())
        } else {
            Err(BackendError::api(
                403,
                "42501",
                format!("new row violates row-level security policy for table \"{}\"", table),
            ))
        }
    }

    fn select_rows(&self, table: &str, query: &Query) -> Vec<Value> {
        let mut rows: Vec<Value> = self
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| self.visible(table, row) && query.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = query.ordering() {
            rows.sort_by(|a, b| {
                let key = |row: &Value| row.get(&order.column).map(sort_key).unwrap_or_default();
                let ordering = key(a).cmp(&key(b));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }

        for embed in query.embeds() {
            for row in rows.iter_mut() {
                let parent_id = row.get("id").cloned().unwrap_or(Value::Null);
                let children: Vec<Value> = self
                    .tables
                    .get(&embed.table)
                    .map(|children| {
                        children
                            .iter()
                            .filter(|child| {
                                child.get(&embed.foreign_key) == Some(&parent_id)
                                    && self.visible(&embed.table, child)
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(object) = row.as_object_mut() {
                    object.insert(embed.table.clone(), Value::Array(children));
                }
            }
        }

        rows
    }

    fn issue_session(&mut self, user: User) -> Session {
        let session = Session {
            access_token: format!("mem-at-{}", uuid::Uuid::new_v4()),
            refresh_token: format!("mem-rt-{}", uuid::Uuid::new_v4()),
            token_type: "bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECS,
            expires_at: Some(Utc::now().timestamp() + ACCESS_TOKEN_TTL_SECS),
            user,
        };
        self.session = Some(session.clone());
        session
    }
}

fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merge(row: &mut Value, patch: &Map<String, Value>) {
    if let Some(object) = row.as_object_mut() {
        for (key, value) in patch {
            object.insert(key.clone(), value.clone());
        }
    }
}

fn invalid_body(table: &str) -> BackendError {
    BackendError::api(400, "PGRST102", format!("Request body for {} must be a JSON object", table))
}

/// In-process implementation of [`AuthApi`], [`TableApi`] and [`ChangeFeedApi`].
pub struct InMemoryBackend {
    base_url: String,
    state: Mutex<State>,
    auth_tx: broadcast::Sender<AuthChange>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(64);
        let (change_tx, _) = broadcast::channel(256);
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            state: Mutex::new(State::default()),
            auth_tx,
            change_tx,
        }
    }

    /// Keep at most `capacity` undelivered auth events per subscriber.
    pub fn with_auth_event_capacity(mut self, capacity: usize) -> Self {
        self.auth_tx = broadcast::channel(capacity).0;
        self
    }

    /// Base URL used when building OAuth redirects.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// When set, sign-up returns no session until the email is confirmed.
    pub fn require_email_confirmation(&self, required: bool) {
        self.state.lock().require_confirmation = required;
    }

    /// Mark an account as confirmed.
    pub fn confirm_email(&self, email: &str) {
        if let Some(account) = self.state.lock().accounts.get_mut(email) {
            account.confirmed = true;
        }
    }

    /// Declare which column of `table` holds the owning user id.
    pub fn set_row_owner(&self, table: &str, owner_column: &str) {
        self.state
            .lock()
            .owners
            .insert(table.to_string(), owner_column.to_string());
    }

    /// Restrict every table operation to rows owned by the signed-in user.
    pub fn set_enforce_ownership(&self, enforce: bool) {
        self.state.lock().enforce_ownership = enforce;
    }

    /// Publish deletes with only the primary key in the old row, as the
    /// realtime service does for tables without full replica identity.
    pub fn set_key_only_deletes(&self, key_only: bool) {
        self.state.lock().key_only_deletes = key_only;
    }

    /// Make the next `op` (optionally only on `table`) fail with an API error.
    pub fn fail_next(&self, op: BackendOp, table: Option<&str>, status: u16, code: &str, message: &str) {
        self.state.lock().faults.push(Fault {
            op,
            table: table.map(str::to_string),
            status,
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Emails the auth service would have sent, oldest first.
    pub fn sent_mail(&self) -> Vec<SentMail> {
        self.state.lock().mail.clone()
    }

    /// Raw table contents, ignoring ownership.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Insert a row directly, bypassing ownership checks and faults.
    pub fn seed(&self, table: &str, row: Value) -> Value {
        let row = {
            let mut state = self.state.lock();
            let mut row = row;
            let now = state.next_timestamp();
            if let Some(object) = row.as_object_mut() {
                object
                    .entry("id")
                    .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
                object.entry("created_at").or_insert_with(|| Value::String(now.clone()));
                object.entry("updated_at").or_insert_with(|| Value::String(now));
            }
            state.tables.entry(table.to_string()).or_default().push(row.clone());
            row
        };
        self.publish(ChangeKind::Insert, table, Some(row.clone()), None);
        row
    }

    /// Number of registered accounts.
    pub fn account_count(&self) -> usize {
        self.state.lock().accounts.len()
    }

    /// Publish an auth change as if the service had produced it.
    ///
    /// `SIGNED_OUT` also ends the current session, the way a server-side
    /// revocation would.
    pub fn emit_auth_event(&self, kind: AuthChangeKind) {
        let session = {
            let mut state = self.state.lock();
            if kind == AuthChangeKind::SignedOut {
                state.session = None;
            }
            state.session.clone()
        };
        self.announce(kind, session);
    }

    fn announce(&self, kind: AuthChangeKind, session: Option<Session>) {
        debug!(event = %kind, has_session = session.is_some(), "Auth change");
        let _ = self.auth_tx.send(AuthChange::new(kind, session));
    }

    fn publish(&self, kind: ChangeKind, table: &str, new: Option<Value>, old: Option<Value>) {
        let _ = self.change_tx.send(ChangeEvent {
            kind,
            table: table.to_string(),
            new,
            old,
        });
    }

    fn fail_point(&self, op: BackendOp, table: Option<&str>) -> BackendResult<()> {
        match self.state.lock().take_fault(op, table) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn apply_update(&self, table: &str, query: &Query, patch: &Value, exactly_one: bool) -> BackendResult<Vec<Value>> {
        let patch = patch.as_object().ok_or_else(|| invalid_body(table))?;
        let mut events = Vec::new();

        let updated = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let matching: Vec<usize> = state
                .tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .enumerate()
                        .filter(|(_, row)| state.visible(table, row) && query.matches(row))
                        .map(|(i, _)| i)
                        .collect()
                })
                .unwrap_or_default();

            if exactly_one && matching.len() != 1 {
                return Err(BackendError::not_found(matching.len()));
            }

            let now = state.next_timestamp();
            let mut staged = Vec::with_capacity(matching.len());
            if let Some(rows) = state.tables.get(table) {
                for &i in &matching {
                    let old = rows[i].clone();
                    let mut new = old.clone();
                    merge(&mut new, patch);
                    if let Some(object) = new.as_object_mut() {
                        object.insert("updated_at".to_string(), Value::String(now.clone()));
                    }
                    state.check_write(table, &new)?;
                    staged.push((i, old, new));
                }
            }

            let mut updated = Vec::with_capacity(staged.len());
            if let Some(rows) = state.tables.get_mut(table) {
                for (i, old, new) in staged {
                    rows[i] = new.clone();
                    events.push((old, new.clone()));
                    updated.push(new);
                }
            }
            updated
        };

        for (old, new) in events {
            self.publish(ChangeKind::Update, table, Some(new), Some(old));
        }
        Ok(updated)
    }
}

#[async_trait]
impl AuthApi for InMemoryBackend {
    async fn get_session(&self) -> BackendResult<Option<Session>> {
        self.fail_point(BackendOp::GetSession, None)?;
        Ok(self.state.lock().session.clone())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_tx.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let session = {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::SignIn, None) {
                return Err(error);
            }
            let account = match state.accounts.get(email) {
                Some(account) if account.password == password => account.clone(),
                _ => {
                    return Err(BackendError::api(400, "invalid_credentials", "Invalid login credentials"))
                }
            };
            if state.require_confirmation && !account.confirmed {
                return Err(BackendError::api(400, "email_not_confirmed", "Email not confirmed"));
            }
            state.issue_session(account.user)
        };

        self.announce(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, data: Value) -> BackendResult<SignUpResponse> {
        let (user, session) = {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::SignUp, None) {
                return Err(error);
            }
            if !email.contains('@') {
                return Err(BackendError::api(
                    400,
                    "validation_failed",
                    "Unable to validate email address: invalid format",
                ));
            }
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(BackendError::api(
                    422,
                    "weak_password",
                    "Password should be at least 6 characters.",
                ));
            }
            if state.accounts.contains_key(email) {
                return Err(BackendError::api(422, "user_already_exists", "User already registered"));
            }

            let created_at = state.next_timestamp();
            let user = User {
                id: uuid::Uuid::new_v4().to_string(),
                email: Some(email.to_string()),
                app_metadata: json!({ "provider": "email", "providers": ["email"] }),
                user_metadata: if data.is_null() { json!({}) } else { data },
                is_anonymous: false,
                created_at: Some(created_at),
            };
            let confirmed = !state.require_confirmation;
            state.accounts.insert(
                email.to_string(),
                AccountRecord {
                    user: user.clone(),
                    password: password.to_string(),
                    confirmed,
                },
            );

            if confirmed {
                let session = state.issue_session(user.clone());
                (user, Some(session))
            } else {
                state.mail.push(SentMail {
                    kind: MailKind::Confirmation,
                    email: email.to_string(),
                    redirect_to: None,
                });
                (user, None)
            }
        };

        if let Some(session) = &session {
            self.announce(AuthChangeKind::SignedIn, Some(session.clone()));
        }
        Ok(SignUpResponse { user, session })
    }

    async fn sign_in_anonymously(&self) -> BackendResult<Session> {
        let session = {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::SignInAnonymously, None) {
                return Err(error);
            }
            let created_at = state.next_timestamp();
            let user = User {
                id: uuid::Uuid::new_v4().to_string(),
                email: None,
                app_metadata: json!({}),
                user_metadata: json!({}),
                is_anonymous: true,
                created_at: Some(created_at),
            };
            state.issue_session(user)
        };

        self.announce(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::SignOut, None) {
                return Err(error);
            }
            state.session = None;
        }
        self.announce(AuthChangeKind::SignedOut, None);
        Ok(())
    }

    async fn oauth_redirect(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> BackendResult<OAuthRedirect> {
        self.fail_point(BackendOp::OAuthRedirect, None)?;
        OAuthRedirect::build(&self.base_url, provider, redirect_to)
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.take_fault(BackendOp::ResetPassword, None) {
            return Err(error);
        }
        state.mail.push(SentMail {
            kind: MailKind::Recovery,
            email: email.to_string(),
            redirect_to: Some(redirect_to.to_string()),
        });
        Ok(())
    }

    async fn get_user(&self) -> BackendResult<Option<User>> {
        self.fail_point(BackendOp::GetUser, None)?;
        Ok(self.state.lock().session.as_ref().map(|s| s.user.clone()))
    }

    async fn update_password(&self, new_password: &str) -> BackendResult<User> {
        let session = {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::UpdatePassword, None) {
                return Err(error);
            }
            let session = state.session.clone().ok_or(BackendError::SessionMissing)?;
            if new_password.chars().count() < MIN_PASSWORD_LEN {
                return Err(BackendError::api(
                    422,
                    "weak_password",
                    "Password should be at least 6 characters.",
                ));
            }
            if let Some(email) = &session.user.email {
                if let Some(account) = state.accounts.get_mut(email) {
                    account.password = new_password.to_string();
                }
            }
            session
        };

        self.announce(AuthChangeKind::UserUpdated, Some(session.clone()));
        Ok(session.user)
    }

    async fn resend_signup_confirmation(&self, email: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.take_fault(BackendOp::ResendConfirmation, None) {
            return Err(error);
        }
        state.mail.push(SentMail {
            kind: MailKind::Confirmation,
            email: email.to_string(),
            redirect_to: None,
        });
        Ok(())
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let session = {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::RefreshSession, None) {
                return Err(error);
            }
            let user = state
                .session
                .as_ref()
                .map(|s| s.user.clone())
                .ok_or(BackendError::SessionMissing)?;
            state.issue_session(user)
        };

        self.announce(AuthChangeKind::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl TableApi for InMemoryBackend {
    async fn select(&self, table: &str, query: &Query) -> BackendResult<Vec<Value>> {
        let mut state = self.state.lock();
        if let Some(error) = state.take_fault(BackendOp::Select, Some(table)) {
            return Err(error);
        }
        Ok(state.select_rows(table, query))
    }

    async fn select_single(&self, table: &str, query: &Query) -> BackendResult<Value> {
        let mut rows = self.select(table, query).await?;
        if rows.len() == 1 {
            Ok(rows.remove(0))
        } else {
            Err(BackendError::not_found(rows.len()))
        }
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Value> {
        let row = {
            let mut state = self.state.lock();
            if let Some(error) = state.take_fault(BackendOp::Insert, Some(table)) {
                return Err(error);
            }

            let mut row = row;
            let now = state.next_timestamp();
            let object = row.as_object_mut().ok_or_else(|| invalid_body(table))?;
            object
                .entry("id")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            object.entry("created_at").or_insert_with(|| Value::String(now.clone()));
            object.entry("updated_at").or_insert_with(|| Value::String(now));

            state.check_write(table, &row)?;

            let id = row.get("id").cloned();
            let rows = state.tables.entry(table.to_string()).or_default();
            if rows.iter().any(|existing| existing.get("id") == id.as_ref()) {
                return Err(BackendError::Api {
                    status: 409,
                    code: Some("23505".to_string()),
                    message: format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
                    details: id.map(|id| format!("Key (id)=({}) already exists.", sort_key(&id))),
                    hint: None,
                });
            }
            rows.push(row.clone());
            row
        };

        self.publish(ChangeKind::Insert, table, Some(row.clone()), None);
        Ok(row)
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> BackendResult<Vec<Value>> {
        self.fail_point(BackendOp::Update, Some(table))?;
        self.apply_update(table, query, &patch, false)
    }

    async fn update_single(&self, table: &str, query: &Query, patch: Value) -> BackendResult<Value> {
        self.fail_point(BackendOp::Update, Some(table))?;
        let mut rows = self.apply_update(table, query, &patch, true)?;
        Ok(rows.remove(0))
    }

    async fn delete(&self, table: &str, query: &Query) -> BackendResult<()> {
        let removed = {
            let mut guard = self.state.lock();
            if let Some(error) = guard.take_fault(BackendOp::Delete, Some(table)) {
                return Err(error);
            }
            let state = &mut *guard;

            let keep: Vec<bool> = state
                .tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .map(|row| !(state.visible(table, row) && query.matches(row)))
                        .collect()
                })
                .unwrap_or_default();

            let mut removed = Vec::new();
            if let Some(rows) = state.tables.get_mut(table) {
                let mut flags = keep.into_iter();
                rows.retain(|row| {
                    let keep = flags.next().unwrap_or(true);
                    if !keep {
                        removed.push(row.clone());
                    }
                    keep
                });
            }
            if state.key_only_deletes {
                for row in removed.iter_mut() {
                    let id = row.get("id").cloned().unwrap_or(Value::Null);
                    *row = json!({ "id": id });
                }
            }
            removed
        };

        for old in removed {
            self.publish(ChangeKind::Delete, table, None, Some(old));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeedApi for InMemoryBackend {
    async fn subscribe(&self, spec: FeedSpec, handler: ChangeHandler) -> BackendResult<FeedSubscription> {
        self.fail_point(BackendOp::Subscribe, Some(&spec.table))?;

        // Receiver exists before this returns, so no later write is missed.
        let mut rx = self.change_tx.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let channel = spec.channel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if spec.accepts(&event) {
                                handler(event);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %spec.channel, skipped, "Change feed lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        debug!(channel = %channel, "Change feed subscribed");
        Ok(FeedSubscription::new(channel, stop_tx, task))
    }
}
