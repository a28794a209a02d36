//! NeuroSync CLI - a thin terminal front-end for the NeuroSync client.
//!
//! Used for smoke testing a backend by hand: sign in, inspect the session,
//! issue raw requests and list tasks. All behaviour lives in
//! `neurosync-core`.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use neurosync_core::api::Method;
use neurosync_core::models::Credentials;
use neurosync_core::{
    ClientConfig, CredentialStore, EncryptedFileStore, ExecuteOptions, KeyringCredentialStore,
    NeuroSyncClient,
};

/// File name of the encrypted session when the keychain is not used.
const SESSION_FILE: &str = "session.sealed";

const USAGE: &str = "\
Usage: neurosync <command> [args]

Commands:
  login [username]   Sign in (prompts for the password)
  logout             Sign out and clear stored credentials
  status             Show the current session
  whoami             Show the signed-in account's profile
  get <path>         GET a backend path and print the JSON response
  tasks              List the signed-in user's tasks

Environment:
  NEUROSYNC_BASE_URL        Backend URL (overrides config.json)
  NEUROSYNC_TIMEOUT_SECS    Per-attempt request timeout
  NEUROSYNC_SESSION_SECRET  Store the session in an encrypted file instead of the OS keychain
  NEUROSYNC_LOG_FILE=1      Also write logs to the cache directory
  RUST_LOG                  Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=neurosync_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = std::env::var("NEUROSYNC_LOG_FILE")
        .is_ok_and(|v| v == "1")
        .then(ClientConfig::cache_dir)
        .and_then(Result::ok)
        .map(|dir| {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "neurosync.log");
            tracing_appender::non_blocking(appender)
        });
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn sealed_session_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(SESSION_FILE)
}

fn credential_store(config: &ClientConfig) -> Result<Arc<dyn CredentialStore>> {
    match std::env::var("NEUROSYNC_SESSION_SECRET") {
        Ok(secret) if !secret.is_empty() => {
            let path = sealed_session_path(&ClientConfig::cache_dir()?);
            info!(path = %path.display(), "Using encrypted session file");
            Ok(Arc::new(EncryptedFileStore::new(path, secret.into_bytes())))
        }
        _ => Ok(Arc::new(KeyringCredentialStore::new(config.keyring_service.clone()))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.first().map(String::as_str) {
        None | Some("-h") | Some("--help") | Some("help") => {
            println!("{}", USAGE);
            return Ok(());
        }
        Some(command) => command,
    };

    let mut config = ClientConfig::load()?;
    config.apply_env();
    let store = credential_store(&config)?;
    let client = NeuroSyncClient::new(config, store)?;
    client.restore_session();

    match command {
        "login" => login(&client, args.get(1).cloned()).await,
        "logout" => {
            client.session().logout().await;
            println!("Signed out.");
            Ok(())
        }
        "status" => {
            status(&client);
            Ok(())
        }
        "get" => {
            let path = args
                .get(1)
                .ok_or_else(|| anyhow!("Usage: neurosync get <path>"))?;
            let value = client
                .dispatcher()
                .execute(Method::GET, path, None, ExecuteOptions::fresh())
                .await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        "whoami" => {
            let profile = client.session().me().await?;
            println!("{} <{}> (id {})", profile.display_name(), profile.email, profile.id);
            Ok(())
        }
        "tasks" => list_tasks(&client).await,
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(client: &NeuroSyncClient, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => {
            print!("Username: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    if username.is_empty() {
        bail!("Username is required");
    }
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let session = client
        .session()
        .login(&Credentials::new(username, password))
        .await?;
    println!("Signed in as user {}.", session.user_id);
    Ok(())
}

fn status(client: &NeuroSyncClient) {
    println!("Backend: {}", client.config().base_url);
    match client.session().current_session() {
        Some(session) => {
            println!("Signed in as user {}", session.user_id);
            match session.minutes_until_expiry() {
                Some(minutes) => println!("Access token expires in {} min", minutes),
                None => println!("Access token expiry unknown"),
            }
            let refresh = if session.refresh_token.is_some() { "yes" } else { "no" };
            println!("Refresh token: {}", refresh);
        }
        None => println!("Signed out"),
    }
}

async fn list_tasks(client: &NeuroSyncClient) -> Result<()> {
    let session = client
        .session()
        .current_session()
        .ok_or_else(|| anyhow!("Not signed in. Run `neurosync login` first."))?;
    let tasks = client.tasks().list(&session.user_id).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for task in tasks {
        let mark = if task.completed { "x" } else { " " };
        let due = task
            .due_date
            .as_deref()
            .map(|d| format!(" (due {})", d))
            .unwrap_or_default();
        println!("[{}] {} - {}{}", mark, task.title, task.priority, due);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sealed_session_is_not_named_as_json() {
        let path = sealed_session_path(Path::new("/tmp/neurosync"));
        assert_eq!(path, Path::new("/tmp/neurosync/session.sealed"));
        assert_ne!(path.extension().and_then(|e| e.to_str()), Some("json"));
    }
}
