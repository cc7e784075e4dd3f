//! Starter - command-line client for the auth, profile and items backend.

mod app;
mod commands;
mod dashboard;
mod navigation;
mod notify;

use std::path::PathBuf;

use backend_client::OAuthProvider;
use clap::{Parser, Subcommand};
use data_access::{ItemStatus, SubscriptionStatus};
use starter_config_and_utils::{init_logging, Config, Paths};
use tracing::error;

/// Starter command-line interface.
#[derive(Parser)]
#[command(name = "starter")]
#[command(about = "Sign in, manage your profile and track items")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (session, logs, config). Defaults to ~/.starter
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Run against a seeded in-memory backend, signed in as the demo account
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current session
    Status,
    /// Sign in with email and password
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "STARTER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "STARTER_PASSWORD", hide_env_values = true)]
        password: String,
        /// Defaults to the part of the email before '@'
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Sign out and clear the stored session
    SignOut,
    /// Print the provider sign-in URL
    Oauth {
        #[arg(default_value = "google")]
        provider: OAuthProvider,
    },
    /// Send a password reset email
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    /// Change the signed-in user's password
    UpdatePassword {
        #[arg(long, env = "STARTER_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Resend the address confirmation email
    ResendVerification,
    /// Show the dashboard
    Dashboard,
    /// Manage your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Manage your items
    Items {
        #[command(subcommand)]
        command: ItemsCommand,
    },
    /// Print item and profile changes as they happen
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Delete the account
    DeleteAccount,
}

#[derive(Subcommand)]
pub(crate) enum ProfileCommand {
    /// Show the profile
    Show {
        /// Include the profile's items
        #[arg(long)]
        with_items: bool,
    },
    /// Change the display name
    Rename { display_name: String },
    /// Set the subscription status (free, trial, paid, cancelled)
    Subscription { status: SubscriptionStatus },
}

#[derive(Subcommand)]
pub(crate) enum ItemsCommand {
    /// List items, newest first
    List {
        /// Only items with this status (pending, in_progress, completed, archived)
        #[arg(long)]
        status: Option<ItemStatus>,
    },
    /// Show one item
    Show { id: String },
    /// Create an item
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Change an item's fields
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<ItemStatus>,
    },
    /// Move an item to a status
    Status { id: String, status: ItemStatus },
    /// Archive an item
    Archive { id: String },
    /// Delete an item
    Delete { id: String },
    /// Search titles and descriptions
    Search { query: String },
    /// Move several items to a status
    BulkStatus {
        status: ItemStatus,
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, &paths, false);

    let mut app = app::start_app(config, paths, cli.offline).await?;
    if app.offline {
        notify::Notice::info(format!("Offline mode, signed in as {}", app::DEMO_EMAIL)).show();
    }

    let result = match cli.command {
        Commands::Status => commands::status(&mut app).await,
        Commands::SignIn { email, password } => commands::sign_in(&mut app, &email, &password).await,
        Commands::SignUp {
            email,
            password,
            display_name,
        } => commands::sign_up(&mut app, &email, &password, display_name.as_deref()).await,
        Commands::SignOut => commands::sign_out(&mut app).await,
        Commands::Oauth { provider } => commands::oauth(&mut app, provider).await,
        Commands::ResetPassword { email } => commands::reset_password(&mut app, &email).await,
        Commands::UpdatePassword { password } => commands::update_password(&mut app, &password).await,
        Commands::ResendVerification => commands::resend_verification(&mut app).await,
        Commands::Dashboard => commands::show_dashboard(&mut app).await,
        Commands::Profile { command } => commands::run_profile(&mut app, command).await,
        Commands::Items { command } => commands::run_items(&mut app, command).await,
        Commands::Watch { seconds } => commands::watch(&mut app, seconds).await,
        Commands::DeleteAccount => commands::delete_account(&mut app).await,
    };

    app.sync.shutdown();

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
    Ok(())
}
