//! krx-session - manage the shared KRX data-portal login from the shell.
//!
//! Uses the same session file as every other process on the machine, so a
//! `login` here is picked up by any program built on krx-session-core.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Local, Utc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use krx_session_core::{Dispatcher, LoginOptions, SessionConfig, SessionManager};

const USAGE: &str = "\
Usage: krx-session <command> [options]

Commands:
  login [--id ID] [--allow-dup]     Log in and store the session
  logout                            Forget the stored session
  status                            Show the stored session
  get URL [key=value ...]           GET through the session layer
  post URL [key=value ...]          POST a form through the session layer

Request options:
  --no-auto-login                   Do not log in automatically
  --allow-dup                       Override an existing login elsewhere

Credentials come from KRX_MBR_ID/KRX_PASSWORD, KRX_CREDENTIALS_FILE or
a prompt. The session file is KRX_SESSION_FILE (or KRX_SESSION_DIR).";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level, e.g. RUST_LOG=krx_session_core=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

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
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let manager = Arc::new(SessionManager::new(SessionConfig::from_env()));

    match command.as_str() {
        "login" => login(&manager, rest).await,
        "logout" => {
            manager.logout();
            println!("Session cleared.");
            Ok(())
        }
        "status" => {
            status(&manager);
            Ok(())
        }
        "get" | "post" => request(manager, command, rest).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(manager: &SessionManager, args: &[String]) -> Result<()> {
    let mut explicit_id: Option<String> = None;
    let mut options = LoginOptions::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--id" => {
                let id = iter.next().ok_or_else(|| anyhow!("--id needs a value"))?;
                explicit_id = Some(id.clone());
            }
            "--allow-dup" => options.allow_duplicate_login = true,
            other => bail!("Unknown login option '{}'", other),
        }
    }

    let credential = manager.resolve_credentials(explicit_id.as_deref(), None)?;
    let (id, secret) = match credential {
        Some(credential) => (credential.id, credential.secret),
        None => {
            let id = match explicit_id {
                Some(id) => id,
                None => prompt_id()?,
            };
            let secret = rpassword::prompt_password("Password: ")?;
            (id, secret)
        }
    };

    println!("Logging in...");
    let outcome = manager
        .login(Some(id.as_str()), Some(secret.as_str()), &options)
        .await?;
    info!(mbr_no = %outcome.mbr_no, "Login complete");

    println!(
        "Logged in as {} (session saved to {})",
        outcome.mbr_no,
        manager.store().path().display()
    );
    Ok(())
}

fn prompt_id() -> Result<String> {
    print!("Member ID: ");
    io::stdout().flush()?;

    let mut id = String::new();
    io::stdin().read_line(&mut id)?;
    let id = id.trim();
    if id.is_empty() {
        bail!("Member ID required");
    }
    Ok(id.to_string())
}

fn status(manager: &SessionManager) {
    let Some(record) = manager.store().load() else {
        println!("No active session ({})", manager.store().path().display());
        return;
    };

    println!("Session file: {}", manager.store().path().display());
    println!(
        "Owner:        {}",
        record.mbr_no.as_deref().unwrap_or("(unknown)")
    );
    println!("Created:      {}", local_time(record.created_at));
    println!("Expires:      {}", local_time(record.expires_at));
    println!("Last used:    {}", local_time(record.last_used));
    println!("Minutes left: {}", record.minutes_until_expiry());

    let names: Vec<&str> = record.cookies.keys().map(String::as_str).collect();
    if names.is_empty() {
        println!("Cookies:      (none)");
    } else {
        println!("Cookies:      {}", names.join(", "));
    }
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn request(manager: Arc<SessionManager>, command: &str, args: &[String]) -> Result<()> {
    let mut url: Option<&str> = None;
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut auto_login = true;
    let mut allow_dup = false;

    for arg in args {
        match arg.as_str() {
            "--no-auto-login" => auto_login = false,
            "--allow-dup" => allow_dup = true,
            other if url.is_none() => url = Some(other),
            other => {
                let (key, value) = other
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Expected key=value, got '{}'", other))?;
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
    let url = url.ok_or_else(|| anyhow!("{} needs a URL", command))?;

    manager.set_auto_login(auto_login, allow_dup);
    let dispatcher = Dispatcher::new(manager);

    let response = if command == "get" {
        dispatcher.get(url, None, pairs, None).await?
    } else {
        dispatcher.post(url, None, pairs, None).await?
    };

    if !response.is_success() {
        eprintln!("HTTP {}", response.status);
    }
    println!("{}", response.text());
    Ok(())
}
