//! Hearth CLI - drive the hearth session core from a terminal.
//!
//! Commands mirror what the app screens do: restore the session, log in,
//! sign up, log out, fetch an endpoint and show the profile.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hearth_core::auth::{redirect_for, route_segments};
use hearth_core::{
    ApiClient, Config, FetchPhase, KeyringStore, ProfileLoader, Resource, SessionManager,
};

/// Directory for a daily-rolling log file, in addition to stderr
const ENV_LOG_DIR: &str = "HEARTH_LOG_DIR";

const USAGE: &str = "\
Usage: hearth <command> [args]

Commands:
  status                   Show the restored session
  login [email]            Log in (prompts for the password)
  signup <email>           Create an account (prompts for the password)
  logout                   Log out and forget stored tokens
  fetch <endpoint> [--public]
                           GET an endpoint; --public skips the auth check
  profile                  Show the signed-in user's profile";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "hearth.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

struct Cli {
    config: Config,
    api: Arc<ApiClient>,
    store: Arc<KeyringStore>,
    session: SessionManager,
}

impl Cli {
    async fn new() -> Result<Self> {
        let config = Config::load()?;
        let api = Arc::new(ApiClient::from_config(&config).context("Failed to create API client")?);
        let store = Arc::new(KeyringStore::new(&config.keyring_service()));
        let session = SessionManager::new(api.clone(), store.clone());
        session.bootstrap().await;
        Ok(Self {
            config,
            api,
            store,
            session,
        })
    }
}

async fn status(ctx: &Cli) -> Result<()> {
    let snapshot = ctx.session.snapshot();
    match &snapshot.user {
        Some(user) => {
            println!("Signed in as {} (id {}, {:?})", user.email, user.id, user.source);
            if let Some(exp) = user.expires_at {
                let state = if user.is_expired() {
                    "expired"
                } else if user.needs_refresh() {
                    "expiring soon"
                } else {
                    "valid"
                };
                println!("Access token {} ({})", state, exp.to_rfc3339());
            }
        }
        None => println!("Not signed in"),
    }

    // Where the app would land from its start screen
    let start = route_segments("/(tabs)/home");
    if let Some(redirect) = redirect_for(&snapshot, start.as_slice()) {
        println!("Route: {}", redirect.route());
    }
    Ok(())
}

async fn login(ctx: &mut Cli, email: Option<&str>) -> Result<()> {
    let email = match email.map(str::to_string).or_else(|| ctx.config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    if !ctx.session.login(&email, &password).await {
        bail!("Login failed");
    }

    ctx.config.last_email = Some(email.clone());
    if let Err(e) = ctx.config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }
    println!("Signed in as {}", email);
    Ok(())
}

async fn signup(ctx: &Cli, email: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    if !ctx.session.signup(email, &password).await {
        bail!("Signup failed");
    }
    println!("Account created. Run `hearth login {}` to sign in.", email);
    Ok(())
}

async fn fetch(ctx: &Cli, endpoint: &str, public: bool) -> Result<()> {
    let resource: Resource = Resource::new(
        endpoint,
        !public,
        ctx.api.clone(),
        ctx.store.clone(),
        ctx.session.subscribe(),
    );
    info!(endpoint = %resource.endpoint(), protected = resource.require_auth(), "Fetching");
    resource.fetch().await;

    let state = resource.state();
    match state.phase() {
        FetchPhase::Success => {
            let body = state.data.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        _ => bail!(state
            .error
            .unwrap_or_else(|| format!("No data from {}", resource.endpoint()))),
    }
}

async fn profile(ctx: &Cli) -> Result<()> {
    let loader = ProfileLoader::new(ctx.api.clone(), ctx.store.clone(), ctx.session.subscribe());
    loader.load().await;

    let state = loader.state();
    if let Some(error) = state.error {
        bail!(error);
    }
    match state.data {
        Some(profile) => {
            println!("{}", profile.display_name());
            println!("  id:       {}", profile.id);
            println!("  email:    {}", profile.email);
            if let Some(username) = &profile.username {
                println!("  username: {}", username);
            }
            if let Some(created) = &profile.created_at {
                println!("  created:  {}", created);
            }
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut ctx = Cli::new().await?;
    info!(command = %command, api = %ctx.api.base_url(), "Hearth CLI starting");

    match command.as_str() {
        "status" => status(&ctx).await,
        "login" => login(&mut ctx, args.get(1).map(String::as_str)).await,
        "signup" => match args.get(1) {
            Some(email) => signup(&ctx, email).await,
            None => bail!("signup needs an email\n\n{}", USAGE),
        },
        "logout" => {
            ctx.session.logout().await;
            println!("Signed out");
            Ok(())
        }
        "fetch" => match args.get(1) {
            Some(endpoint) => fetch(&ctx, endpoint, args.iter().any(|a| a == "--public")).await,
            None => bail!("fetch needs an endpoint\n\n{}", USAGE),
        },
        "profile" => profile(&ctx).await,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}
