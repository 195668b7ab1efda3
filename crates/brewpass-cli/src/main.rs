//! brewpass - command-line driver for the brewpass session core.
//!
//! Restores the saved session, runs one lifecycle command against the
//! Identity API, and reports the resulting session state.

use std::io;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use brewpass_core::{Config, GuardDecision, SessionManager, SessionPhase, SessionUser};

const USAGE: &str = "\
Usage: brewpass <command>

Commands:
  status                          Show the current session
  login [username]                Sign in (prompts for password)
  register <username> <email>     Create an account and sign in
  logout                          Sign out and forget stored credentials
  refresh                         Exchange the refresh credential for a new access credential
  visit <path>                    Show what the route guard does for a path
  fetch <path>                    Authenticated GET, printing the JSON response";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config = Config::load().context("Failed to load config")?;
    let manager = config.session_manager()?;
    manager.restore().await;
    info!(command = command.as_str(), "brewpass starting");

    match (command.as_str(), &args[1..]) {
        ("status", []) => {
            manager.verification().await;
            print_status(&manager);
        }
        ("login", rest) if rest.len() <= 1 => {
            let username = match rest.first().cloned().or_else(|| config.last_username.clone()) {
                Some(username) => username,
                None => prompt("Username: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let user = manager.login(&username, &password).await?;
            println!("Signed in as {}", user.display_name());
            remember_username(&mut config, username);
        }
        ("register", [username, email]) => {
            let password = rpassword::prompt_password("Choose a password: ")?;
            let user = manager.register(username, email, &password).await?;
            println!("Welcome, {}", user.display_name());
            remember_username(&mut config, username.clone());
        }
        ("logout", []) => {
            manager.logout().await;
            println!("Signed out");
        }
        ("refresh", []) => match manager.refresh_access_token().await {
            Ok(()) => println!("Session refreshed"),
            Err(e) => println!("Session ended: {}", e),
        },
        ("visit", [path]) => {
            let decision = config.route_guard().evaluate(&manager.snapshot(), path);
            match decision {
                GuardDecision::Loading => println!("Loading..."),
                GuardDecision::Render => println!("Render {}", path),
                GuardDecision::Redirect(redirect) => {
                    println!("Redirect to {} (return to {})", redirect.to, redirect.return_to)
                }
            }
        }
        ("fetch", [path]) => {
            let value: serde_json::Value = manager.fetch_json(path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn print_status(manager: &SessionManager) {
    let session = manager.snapshot();
    let phase = match session.phase() {
        SessionPhase::Uninitialized | SessionPhase::Restoring => "starting",
        SessionPhase::Authenticated => "signed in",
        SessionPhase::Refreshing => "refreshing",
        SessionPhase::Unauthenticated => "signed out",
    };
    println!("Session: {}", phase);

    match session.user() {
        Some(SessionUser::Verified(user)) => println!("User: {} <{}>", user.username, user.email),
        Some(SessionUser::Unverified) => println!("User: (not verified - server unreachable)"),
        None => {}
    }
    if session.is_storage_degraded() {
        println!("Warning: credentials could not be saved; this session will not survive a restart");
    }
    if let Some(err) = session.last_error() {
        println!("Last error: {}", err);
    }
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;

    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn remember_username(config: &mut Config, username: String) {
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }
}
