use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use reader_auth::analytics::{AnalyticsError, AnalyticsSink, LogSnagClient, NoopAnalytics};
use reader_auth::config::{AppConfig, ConfigError};
use reader_auth::guard::NavigationGuard;
use reader_auth::identity::supabase::SupabaseAuth;
use reader_auth::identity::{Credentials, ProviderError};
use reader_auth::router::{NavigationError, NavigationOutcome, Router};
use reader_auth::routes::RouteTable;
use reader_auth::session::SessionStore;
use reader_auth::storage::{FileStore, LocalStore, StorageError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("local store error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Provider(#[from] ProviderError),
    #[error("analytics setup failed: {0}")]
    Analytics(#[from] AnalyticsError),
    #[error("navigation failed: {0}")]
    Navigation(#[from] NavigationError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "reader-auth", about = "Reader session and navigation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and print the current session.
    Status,
    /// List the route table.
    Routes,
    /// Run navigations in order and print where each one lands.
    Navigate {
        #[arg(required = true)]
        targets: Vec<String>,
    },
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "READER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "READER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignOut,
    /// Drop the local session without contacting the provider.
    ForceSignOut,
    Guest {
        #[arg(value_enum)]
        action: GuestAction,
    },
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    UpdatePassword {
        #[arg(long, env = "READER_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum GuestAction {
    Enable,
    Disable,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let store = Arc::new(build_store(&config)?);

    let result = run(&config, &store, cli.command).await;
    store.unsubscribe();
    store.drain_background().await;
    result
}

fn build_store(config: &AppConfig) -> Result<SessionStore, CliError> {
    let local: Arc<dyn LocalStore> = Arc::new(FileStore::open(&config.local_store_path)?);
    let provider = Arc::new(SupabaseAuth::new(&config.supabase, Arc::clone(&local))?);
    let analytics: Arc<dyn AnalyticsSink> = match &config.analytics {
        Some(logsnag) => Arc::new(LogSnagClient::new(logsnag, &config.environment)?),
        None => {
            tracing::info!("LOGSNAG_TOKEN not set; analytics disabled");
            Arc::new(NoopAnalytics)
        }
    };
    Ok(SessionStore::new(provider, analytics, local))
}

async fn run(config: &AppConfig, store: &Arc<SessionStore>, command: Command) -> Result<(), CliError> {
    match command {
        Command::Status => {
            store.initialize().await;
            print_json(&store.snapshot())
        }
        Command::Routes => print_json(RouteTable::default().routes()),
        Command::Navigate { targets } => {
            let guard = NavigationGuard::new(config.routes.clone());
            let router = Router::new(RouteTable::default(), guard, Arc::clone(store));
            for target in targets {
                match router.navigate(&target).await? {
                    NavigationOutcome::Completed(location) => {
                        println!("{target} -> {} ({})", location.full_path(), location.name);
                    }
                    NavigationOutcome::Superseded => println!("{target} -> superseded"),
                }
            }
            Ok(())
        }
        Command::SignIn { email, password } => {
            store.initialize().await;
            let response = store.sign_in(&Credentials::new(email, password)).await?;
            print_json(&response.user())
        }
        Command::SignUp { email, password } => {
            let response = store.sign_up(&Credentials::new(email, password)).await?;
            if response.session.is_none() {
                println!("check your inbox to confirm the account");
            }
            print_json(&response.user())
        }
        Command::SignOut => {
            store.initialize().await;
            store.sign_out().await;
            println!("signed out");
            Ok(())
        }
        Command::ForceSignOut => {
            store.force_sign_out();
            println!("local session cleared");
            Ok(())
        }
        Command::Guest { action: GuestAction::Enable } => {
            store.enable_guest_mode()?;
            println!("guest mode enabled");
            Ok(())
        }
        Command::Guest { action: GuestAction::Disable } => {
            store.disable_guest_mode()?;
            println!("guest mode disabled");
            Ok(())
        }
        Command::ResetPassword { email } => {
            store.reset_password(&email).await?;
            println!("password reset email sent to {email}");
            Ok(())
        }
        Command::UpdatePassword { password } => {
            store.initialize().await;
            store.update_password(&password).await?;
            println!("password updated");
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
