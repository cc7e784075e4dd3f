//! HTTP + WebSocket client for a Supabase-style backend.
//!
//! - `auth`: GoTrue endpoints under `/auth/v1`, session restore and refresh
//! - `rest`: PostgREST tables under `/rest/v1`
//! - `realtime`: Phoenix channels under `/realtime/v1/websocket`

mod auth;
mod realtime;
mod rest;

use crate::error::summarize_body;
use crate::{AuthChange, AuthChangeKind, BackendError, BackendResult, RefreshConfig, Session};
use session_storage::SessionVault;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

pub use realtime::PhoenixMessage;

/// Default interval between realtime heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Client for the auth, table and change-feed services of one project.
pub struct SupabaseClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    request_timeout: Duration,
    session: RwLock<Option<Session>>,
    vault: Option<SessionVault>,
    refresh_config: RefreshConfig,
    auth_tx: broadcast::Sender<AuthChange>,
    heartbeat_interval: Duration,
}

impl SupabaseClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_url` - The project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The project's anonymous API key
    /// * `request_timeout` - Timeout applied to every HTTP request
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        request_timeout: Duration,
    ) -> BackendResult<Self> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&api_url)?;

        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        let (auth_tx, _) = broadcast::channel(64);

        Ok(Self {
            http_client,
            api_url,
            anon_key: anon_key.into(),
            request_timeout,
            session: RwLock::new(None),
            vault: None,
            refresh_config: RefreshConfig::default(),
            auth_tx,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        })
    }

    /// Persist sessions through `vault` and restore from it on first use.
    pub fn with_vault(mut self, vault: SessionVault) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_refresh_config(mut self, refresh_config: RefreshConfig) -> Self {
        self.refresh_config = refresh_config;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Build the auth API URL for an endpoint.
    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, endpoint)
    }

    /// Build the REST API URL for a table.
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    /// Project reference (e.g., "abc123" from "https://abc123.supabase.co").
    fn project_ref(&self) -> String {
        url::Url::parse(&self.api_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.split('.').next().unwrap_or(h).to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Bearer token for table and feed requests: the session's, else the anon key.
    async fn bearer_token(&self) -> BackendResult<String> {
        Ok(match self.current_access_token().await? {
            Some(token) => token,
            None => self.anon_key.clone(),
        })
    }

    fn emit(&self, kind: AuthChangeKind, session: Option<Session>) {
        debug!(event = %kind, has_session = session.is_some(), "Auth change");
        // No receivers is fine; nobody is listening yet.
        let _ = self.auth_tx.send(AuthChange::new(kind, session));
    }
}

/// Turn a non-success response into a [`BackendError::Api`].
async fn check_response(response: reqwest::Response, context: &str) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = BackendError::from_response(status.as_u16(), &body);
    if error.is_not_found() {
        debug!(status = %status, context, "Backend reported no matching row");
    } else {
        warn!(
            status = %status,
            code = error.code().unwrap_or("-"),
            body_summary = %summarize_body(&body),
            context,
            "Backend request failed"
        );
    }
    Err(error)
}
