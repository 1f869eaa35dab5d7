//! GeoCam Talk CLI - a command-line client for a GeoCam Talk server.
//!
//! Credentials live in the OS keychain; the session itself only lasts for
//! one invocation, so each command logs in as needed.

mod args;

use std::io::{self, Write};

use anyhow::{Context, Result};
use geocam_talk_core::auth::Credentials;
use geocam_talk_core::{Config, CredentialStore, ServerResponse, SessionClient};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Command, USAGE};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
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

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let command = args::parse(&argv)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    if let Command::SetServer { ref server_root, ref app_path } = command {
        // Saved before env overrides so they never land in the file
        config.server_root = server_root.clone();
        if let Some(app_path) = app_path {
            config.app_path = app_path.clone();
        }
        config.save().context("Failed to save config")?;
        println!("Server set to {} (app path {})", config.server_root, config.app_path);
        return Ok(());
    }
    config.apply_env();
    info!(server = %config.server_root, app = %config.app_path, "Using server");

    let client = SessionClient::from_config(&config).context("Failed to create session client")?;
    run(command, &client, &config).await
}

async fn run(command: Command, client: &SessionClient, config: &Config) -> Result<()> {
    match command {
        Command::SetCredentials { username } => {
            let username = match username {
                Some(u) => u,
                None => prompt_username()?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            client
                .credential_store()
                .store_credentials(&username, &password)
                .context("Failed to store credentials")?;
            println!("Credentials stored for {}", username);
        }
        Command::Login => {
            client.login().await?;
            println!("Login successful");
        }
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Command::Status => {
            let stored = client
                .credential_store()
                .credentials()
                .context("Failed to read stored credentials")?;
            println!("{}", describe_status(config, &stored));
        }
        Command::Get { path, params } => {
            let response = client.get(&path, &params).await?;
            print_response(&response)?;
        }
        Command::Post { path, params, audio } => {
            let audio = match audio {
                Some(file) => Some(
                    tokio::fs::read(&file)
                        .await
                        .with_context(|| format!("Failed to read {}", file.display()))?,
                ),
                None => None,
            };
            let response = client.post(&path, &params, audio.as_deref()).await?;
            print_response(&response)?;
        }
        Command::Fetch { path, params, out } => {
            let destination = match out {
                Some(path) => path,
                None => config.default_download_path()?,
            };
            let saved = client.fetch_binary(&path, &params, &destination).await?;
            println!("Saved to {}", saved.display());
        }
        Command::SetServer { .. } | Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

/// Offline summary: sessions do not outlive the process, so this never logs
/// in. `login` is the way to check the credentials against the server.
fn describe_status(config: &Config, stored: &Credentials) -> String {
    let server = format!(
        "Server: {}/{}",
        config.server_root.trim_end_matches('/'),
        config.app_path.trim_start_matches('/')
    );
    match stored.username {
        Some(ref username) if stored.is_complete() => {
            format!("{}\nCredentials stored for {}", server, username)
        }
        _ => format!(
            "{}\nNo credentials stored; run `geocam-talk set-credentials`",
            server
        ),
    }
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn print_response(response: &ServerResponse) -> Result<()> {
    eprintln!("HTTP {}", response.status());
    let mut stdout = io::stdout();
    stdout.write_all(response.body())?;
    if !response.body().ends_with(b"\n") {
        writeln!(stdout)?;
    }
    Ok(())
}
