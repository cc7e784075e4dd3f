//! Live view: print row changes and follow auth events until interrupted.

use super::{failed, render, require_user, CommandResult};
use crate::app::AppState;
use crate::navigation::Route;
use crate::notify::Notice;
use data_access::{DeletedRow, Item, Profile, RowChange};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

fn print_item_change(change: RowChange<Item>) {
    match change {
        RowChange::Inserted(item) => println!("+ item {}  {}", item.id, item.title),
        RowChange::Updated { new, .. } => println!("~ item {}  {}  [{}]", new.id, new.title, new.status),
        RowChange::Deleted(DeletedRow::Row(item)) => println!("- item {}  {}", item.id, item.title),
        RowChange::Deleted(DeletedRow::Key(id)) => println!("- item {}", id),
    }
}

fn print_profile_change(change: RowChange<Profile>) {
    match change {
        RowChange::Inserted(profile) | RowChange::Updated { new: profile, .. } => println!(
            "~ profile {}  [{}]",
            profile.display_name.as_deref().unwrap_or("(no name)"),
            profile.subscription_status
        ),
        RowChange::Deleted(_) => println!("- profile"),
    }
}

pub async fn watch(app: &mut AppState, seconds: Option<u64>) -> CommandResult {
    let user = require_user(app)?;
    let mut events = app.sync.subscribe();

    let items = app
        .items
        .subscribe(&user.id, print_item_change)
        .await
        .map_err(|e| failed("Failed to subscribe to items", e))?;
    let profile = match app.profiles.subscribe(&user.id, print_profile_change).await {
        Ok(profile) => profile,
        Err(e) => {
            items.unsubscribe().await;
            return Err(failed("Failed to subscribe to profile", e));
        }
    };
    Notice::info("Watching for changes, press Ctrl-C to stop").show();
    info!(user_id = %user.id, seconds = ?seconds, "Watching change feeds");

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut signed_out = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(intent) = event.intent else { continue };
                    let snapshot = app.snapshot();
                    let route = app.navigator.follow(intent, &snapshot);
                    if route != Route::Dashboard {
                        signed_out = Some(route);
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }

    items.unsubscribe().await;
    profile.unsubscribe().await;

    match signed_out {
        Some(route) => {
            Notice::info("Signed out").show();
            render(app, route).await
        }
        None => Ok(()),
    }
}
