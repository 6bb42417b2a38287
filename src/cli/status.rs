use super::config::OperatorConfig;
use matrixbot::persistence::{CredentialStore, SqliteCredentialStore};
use std::path::{Path, PathBuf};

/// What the credential database holds
#[derive(Debug, PartialEq, Eq)]
pub enum IdentityStatus {
    /// No database file yet (first run pending)
    NoDatabase,
    /// Database exists but has no record
    Empty,
    /// A record exists; `complete` is false if any identity field is empty
    Cached {
        user_id: String,
        device_id: String,
        complete: bool,
        has_pickle_key: bool,
    },
}

/// Inspect the credential database without creating it
pub async fn inspect(path: &Path) -> Result<IdentityStatus, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(IdentityStatus::NoDatabase);
    }

    let store = SqliteCredentialStore::open(path).await?;
    let status = match store.load().await? {
        None => IdentityStatus::Empty,
        Some(record) => IdentityStatus::Cached {
            complete: record.credentials().is_some(),
            has_pickle_key: record.pickle_key.is_some(),
            user_id: record.user_id,
            device_id: record.device_id,
        },
    };
    Ok(status)
}

/// Show the cached identity. Never prints the access token or pickle key.
pub async fn execute(
    config_path: Option<String>,
    credentials_path: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.map(PathBuf::from);
    let operator = OperatorConfig::resolve(config_path.as_deref())?;
    let credentials_path = credentials_path
        .map(PathBuf::from)
        .unwrap_or(operator.storage.credentials_path);

    println!("matrixbot status");
    println!("Credentials: {}", credentials_path.display());
    println!("State store: {}", operator.storage.state_store_path.display());
    println!();

    match inspect(&credentials_path).await? {
        IdentityStatus::NoDatabase => {
            println!("No credential database; the next run will log in with a password.")
        }
        IdentityStatus::Empty => {
            println!("No cached identity; the next run will log in with a password.")
        }
        IdentityStatus::Cached {
            user_id,
            device_id,
            complete,
            has_pickle_key,
        } => {
            println!("User:       {}", user_id);
            println!("Device:     {}", device_id);
            println!("Pickle key: {}", if has_pickle_key { "present" } else { "missing" });
            if complete {
                println!("The next run will resume this session.");
            } else {
                println!("Identity is incomplete; the next run will log in again.");
            }
        }
    }

    Ok(())
}
