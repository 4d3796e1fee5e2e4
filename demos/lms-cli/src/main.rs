//! LMS CLI
//!
//! A small command-line companion for the LMS API client. Sessions persist
//! in the platform config directory, so `login` once and the other commands
//! reuse (and transparently refresh) the stored tokens.
//!
//! Run with: cargo run -p lms-cli -- --api-url http://localhost:8000/api login ada

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lms_api_client::{ApiClient, ApiError, ClientConfig, FileTokenStore, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "lms-cli")]
#[command(about = "Talk to the LMS backend from the terminal")]
struct Args {
    /// API base URL (falls back to LMS_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Session file (default: <config dir>/lms-api-client/session.json)
    #[arg(long)]
    session: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session
    Login {
        /// Username
        username: String,
        /// Password (read from LMS_PASSWORD when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// GET a resource and print it as JSON
    Get {
        /// Path relative to the API base URL, e.g. /quizzes/42/
        path: String,
        /// Retry server errors and network failures
        #[arg(long)]
        retry: bool,
    },
    /// DELETE a resource
    Delete {
        /// Path relative to the API base URL
        path: String,
    },
    /// Switch the active role (student, admin, ...)
    Role {
        /// Role identifier
        role: String,
    },
    /// Show who is logged in
    Whoami,
    /// Forget the stored session
    Logout,
}

fn build_client(args: &Args) -> anyhow::Result<ApiClient> {
    let config = match &args.api_url {
        Some(url) => ClientConfig::builder().base_url(url.as_str()).build(),
        None => ClientConfig::from_env().context("pass --api-url or set LMS_API_URL")?,
    };

    let store = match &args.session {
        Some(path) => FileTokenStore::with_path(path.clone()),
        None => FileTokenStore::new(),
    };
    tracing::debug!(path = %store.path().display(), "Using session file");

    let client = ApiClient::builder()
        .config(config)
        .store(Arc::new(store))
        .on_session_expired(|route: &str| {
            eprintln!("Session expired. Run `lms-cli login <username>` ({route}).");
        })
        .build()?;
    Ok(client)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = build_client(&args)?;

    match args.command {
        Command::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => std::env::var("LMS_PASSWORD")
                    .context("pass --password or set LMS_PASSWORD")?,
            };
            let login = client
                .login(&serde_json::json!({ "username": username, "password": password }))
                .await?;
            let username = login
                .user
                .as_ref()
                .and_then(|user| user.get("username"))
                .and_then(serde_json::Value::as_str);
            match username {
                Some(name) => println!("Logged in as {name}"),
                None => println!("Logged in"),
            }
        }
        Command::Get { path, retry } => {
            let policy = if retry {
                RetryPolicy::default()
            } else {
                RetryPolicy::never()
            };
            let body: serde_json::Value = policy.run(|| client.get(&path)).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Delete { path } => {
            client.delete(&path).await?;
            println!("Deleted {path}");
        }
        Command::Role { role } => {
            client.set_active_role(&role)?;
            println!("Active role: {role}");
        }
        Command::Whoami => match client.current_user() {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&user)?);
                if let Some(role) = client.active_role() {
                    println!("Active role: {role}");
                }
            }
            None if client.is_authenticated() => println!("Logged in (no cached profile)"),
            None => println!("Not logged in"),
        },
        Command::Logout => {
            client.logout()?;
            println!("Logged out");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing (quiet by default, use RUST_LOG=debug to see requests)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(args).await {
        // Pipeline errors already carry a user-facing message
        if let Some(api_err) = err.downcast_ref::<ApiError>() {
            eprintln!("Error: {}", api_err.user_message());
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}
