//! Application initialization.

use crate::app::{offline_backend, AppState};
use crate::navigation::Navigator;
use backend_client::{Backend, SupabaseClient};
use data_access::{ItemAccess, ProfileAccess};
use session_storage::{FileStorage, SessionVault};
use session_sync::{AuthRedirects, SessionSynchronizer};
use starter_config_and_utils::{Config, Paths};
use std::sync::Arc;
use tracing::info;

/// Build the backend, start the session synchronizer and wait for the
/// initial session fetch.
pub async fn start_app(
    config: Config,
    paths: Paths,
    offline: bool,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let backend: Arc<dyn Backend> = if offline {
        offline_backend().await? as Arc<dyn Backend>
    } else {
        online_backend(&config, &paths)?
    };

    let redirects = AuthRedirects {
        oauth_callback: config.oauth_callback_url(),
        password_reset: config.password_reset_url(),
    };
    let sync = SessionSynchronizer::start(backend.clone(), redirects);
    let snapshot = sync.ready().await;
    info!(
        phase = %snapshot.phase,
        offline,
        user_id = snapshot.session.as_ref().map(|s| s.user.id.as_str()).unwrap_or("none"),
        "Session synchronizer ready"
    );

    Ok(AppState {
        items: ItemAccess::new(backend.clone()),
        profiles: ProfileAccess::new(backend),
        sync,
        navigator: Navigator::new(),
        config,
        paths,
        offline,
    })
}

fn online_backend(config: &Config, paths: &Paths) -> Result<Arc<dyn Backend>, Box<dyn std::error::Error>> {
    paths.ensure_dirs()?;
    let storage = FileStorage::open(paths.session_file())?;

    let key_prefix: String = config.backend_anon_key.chars().take(12).collect();
    info!(
        backend_url = %config.backend_url,
        anon_key_prefix = %key_prefix,
        session_file = %paths.session_file().display(),
        "Connecting to backend"
    );

    let client = SupabaseClient::new(
        config.backend_url.as_str(),
        config.backend_anon_key.as_str(),
        config.request_timeout(),
    )?
    .with_vault(SessionVault::new(Box::new(storage)));
    Ok(Arc::new(client))
}
