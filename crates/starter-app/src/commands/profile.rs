use super::{failed, require_user, CommandResult};
use crate::app::AppState;
use crate::notify::Notice;
use crate::ProfileCommand;
use data_access::Profile;

pub async fn run_profile(app: &mut AppState, command: ProfileCommand) -> CommandResult {
    let user = require_user(app)?;

    match command {
        ProfileCommand::Show { with_items } => {
            if with_items {
                let loaded = app
                    .profiles
                    .get_with_items(&user.id)
                    .await
                    .map_err(|e| failed("Failed to load profile", e))?;
                match loaded {
                    Some(loaded) => {
                        print_profile(&loaded.profile);
                        println!("Items:        {}", loaded.items.len());
                        for item in &loaded.items {
                            println!("  {}  {:<11}  {}", item.id, item.status, item.title);
                        }
                    }
                    None => Notice::info("No profile yet").show(),
                }
            } else {
                match app
                    .profiles
                    .get(&user.id)
                    .await
                    .map_err(|e| failed("Failed to load profile", e))?
                {
                    Some(profile) => print_profile(&profile),
                    None => {
                        let summary = app
                            .profiles
                            .check_subscription_status(&user.id)
                            .await
                            .map_err(|e| failed("Failed to load subscription", e))?;
                        Notice::info(format!("No profile yet (subscription: {})", summary.status)).show();
                    }
                }
            }
        }
        ProfileCommand::Rename { display_name } => {
            let profile = app
                .sync
                .update_profile(&display_name)
                .await
                .map_err(|e| failed("Failed to update profile", e))?;
            Notice::success("Profile updated").show();
            print_profile(&profile);
        }
        ProfileCommand::Subscription { status } => {
            let profile = app
                .profiles
                .update_subscription_status(&user.id, status)
                .await
                .map_err(|e| failed("Failed to update subscription", e))?;
            Notice::success(format!("Subscription set to {}", profile.subscription_status)).show();
        }
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("Id:           {}", profile.id);
    println!("Email:        {}", profile.email.as_deref().unwrap_or("(none)"));
    println!("Display name: {}", profile.display_name.as_deref().unwrap_or("(none)"));
    println!(
        "Subscription: {}{}",
        profile.subscription_status,
        if profile.is_paid { " (paid)" } else { "" }
    );
    println!("Member since: {}", profile.created_at.format("%Y-%m-%d"));
}
