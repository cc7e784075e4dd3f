//! Account commands: status, sign-in/up/out, OAuth, password flows.

use super::{failed, follow_next_intent, render, require_user, CommandResult};
use crate::app::AppState;
use crate::dashboard;
use crate::navigation::{Navigator, Route};
use crate::notify::Notice;
use backend_client::OAuthProvider;
use chrono::{TimeZone, Utc};
use tracing::info;

pub async fn status(app: &mut AppState) -> CommandResult {
    let snapshot = app.snapshot();
    let backend = if app.offline {
        "in-memory (offline)".to_string()
    } else {
        app.config.backend_url.clone()
    };

    println!("Backend: {}", backend);
    println!("Phase:   {}", snapshot.phase);
    match &snapshot.session {
        Some(session) => {
            println!("User:    {}", session.user.id);
            println!("Email:   {}", session.user.email.as_deref().unwrap_or("(none)"));
            if let Some(expires) = session.expires_at.and_then(|at| Utc.timestamp_opt(at, 0).single()) {
                println!("Expires: {}", expires.to_rfc3339());
            }
        }
        None => println!("User:    (not signed in)"),
    }
    if !app.offline {
        println!("Session: {}", app.paths.session_file().display());
    }
    println!("Home:    {}", Navigator::resolve(Route::Landing, &snapshot));
    Ok(())
}

pub async fn sign_in(app: &mut AppState, email: &str, password: &str) -> CommandResult {
    let mut events = app.sync.subscribe();
    let session = app
        .sync
        .sign_in(email, password)
        .await
        .map_err(|e| failed("Failed to sign in", e))?;
    Notice::success("Successfully signed in!").show();
    info!(user_id = %session.user.id, "Signed in from CLI");

    match follow_next_intent(app, &mut events).await {
        Some(route) => render(app, route).await,
        None => Ok(()),
    }
}

pub async fn sign_up(
    app: &mut AppState,
    email: &str,
    password: &str,
    display_name: Option<&str>,
) -> CommandResult {
    let mut events = app.sync.subscribe();
    let outcome = app
        .sync
        .sign_up(email, password, display_name)
        .await
        .map_err(|e| failed("Failed to create account", e))?;

    if !outcome.profile_created {
        Notice::info("Account created, but the profile could not be saved yet").show();
    }
    if outcome.session.is_none() {
        Notice::success("Account created! Check your email to confirm your address.").show();
        return Ok(());
    }

    Notice::success("Account created!").show();
    match follow_next_intent(app, &mut events).await {
        Some(route) => render(app, route).await,
        None => Ok(()),
    }
}

pub async fn sign_out(app: &mut AppState) -> CommandResult {
    let mut events = app.sync.subscribe();
    app.sync
        .sign_out()
        .await
        .map_err(|e| failed("Failed to sign out", e))?;
    Notice::success("Successfully signed out").show();

    match follow_next_intent(app, &mut events).await {
        Some(route) => render(app, route).await,
        None => Ok(()),
    }
}

pub async fn oauth(app: &mut AppState, provider: OAuthProvider) -> CommandResult {
    let redirect = app
        .sync
        .sign_in_with_oauth(provider)
        .await
        .map_err(|e| failed(&format!("Failed to sign in with {}", provider), e))?;
    Notice::info(format!("Redirecting to {}...", provider)).show();
    println!("{}", redirect.url);
    Ok(())
}

pub async fn reset_password(app: &mut AppState, email: &str) -> CommandResult {
    app.sync
        .reset_password(email)
        .await
        .map_err(|e| failed("Failed to send reset email", e))?;
    Notice::success("Password reset email sent").show();
    Ok(())
}

pub async fn update_password(app: &mut AppState, password: &str) -> CommandResult {
    require_user(app)?;
    app.sync
        .update_password(password)
        .await
        .map_err(|e| failed("Failed to update password", e))?;
    Notice::success("Password updated").show();
    Ok(())
}

pub async fn resend_verification(app: &mut AppState) -> CommandResult {
    app.sync
        .send_email_verification()
        .await
        .map_err(|e| failed("Failed to send verification email", e))?;
    Notice::success("Verification email sent").show();
    Ok(())
}

pub async fn delete_account(app: &mut AppState) -> CommandResult {
    app.sync
        .delete_account()
        .await
        .map_err(|e| failed("Failed to delete account", e))
}

pub async fn show_dashboard(app: &mut AppState) -> CommandResult {
    let user = require_user(app)?;
    let snapshot = app.snapshot();
    app.navigator.navigate(Route::Dashboard, &snapshot);

    let summary = dashboard::load(app, &user)
        .await
        .map_err(|e| failed("Failed to load data", e))?;
    print!("{}", summary.render());
    Ok(())
}
