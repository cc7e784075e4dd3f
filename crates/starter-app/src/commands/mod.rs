//! Command handlers. Each prints its own notices; an `Err` only sets the
//! exit status.

mod auth;
mod items;
mod profile;
mod watch;

pub use auth::{
    delete_account, oauth, resend_verification, reset_password, show_dashboard, sign_in, sign_out, sign_up,
    status, update_password,
};
pub use items::run_items;
pub use profile::run_profile;
pub use watch::watch;

use crate::app::AppState;
use crate::navigation::Route;
use crate::notify::Notice;
use backend_client::User;
use session_sync::SessionEvent;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::broadcast;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

const INTENT_WAIT: Duration = Duration::from_secs(5);

/// Show a failure notice and turn `error` into the command's error.
pub(crate) fn failed(message: &str, error: impl Display) -> Box<dyn std::error::Error> {
    Notice::failure(message, &error).show();
    error.to_string().into()
}

/// The signed-in user, or a redirect to the sign-in page.
pub(crate) fn require_user(app: &mut AppState) -> Result<User, Box<dyn std::error::Error>> {
    let snapshot = app.snapshot();
    match snapshot.session {
        Some(session) => Ok(session.user),
        None => {
            let route = app.navigator.navigate(Route::Dashboard, &snapshot);
            Notice::info(format!("Not signed in, continue at {}", route)).show();
            Err("not signed in".into())
        }
    }
}

/// Wait for the next auth event that carries a navigation intent and follow it.
pub(crate) async fn follow_next_intent(
    app: &mut AppState,
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Option<Route> {
    let deadline = tokio::time::Instant::now() + INTENT_WAIT;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        };
        if let Some(intent) = event.intent {
            let snapshot = app.snapshot();
            return Some(app.navigator.follow(intent, &snapshot));
        }
    }
}

/// Print what the page at `route` shows.
pub(crate) async fn render(app: &mut AppState, route: Route) -> CommandResult {
    match route {
        Route::Dashboard => show_dashboard(app).await,
        Route::Landing => {
            println!("Starter");
            println!("  Sign in:  starter sign-in --email <email>");
            println!("  Sign up:  starter sign-up --email <email>");
            Ok(())
        }
        Route::SignIn => {
            println!("Sign in with: starter sign-in --email <email>");
            Ok(())
        }
        other => {
            println!("{}", other);
            Ok(())
        }
    }
}
