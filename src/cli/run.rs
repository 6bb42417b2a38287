use super::config::OperatorConfig;
use super::init_logging;
use matrixbot::config::BotConfig;
use matrixbot::matrix::{
    interrupt_signal, wait_for_shutdown, Bootstrapper, PingResponder, SdkClient,
    ShutdownReason, Supervisor,
};
use matrixbot::persistence::SqliteCredentialStore;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Run the bot service
///
/// ## Configuration Loading
///
/// Operator settings (database paths, log level) are loaded from one of, in
/// order of precedence:
/// 1. `--config` flag if provided
/// 2. `<config dir>/matrixbot/config.toml` if it exists
/// 3. Built-in defaults (`matrix_bot_creds.db`, `matrix_bot.db` in the
///    working directory)
///
/// `--credentials` and `--state-store` override the configured paths.
/// Account settings always come from the environment.
pub async fn execute(
    config_path: Option<String>,
    credentials_path: Option<String>,
    state_store_path: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.map(PathBuf::from);
    let operator = OperatorConfig::resolve(config_path.as_deref())?;
    init_logging(&operator.logging.level);

    let credentials_path = credentials_path
        .map(PathBuf::from)
        .unwrap_or(operator.storage.credentials_path);
    let state_store_path = state_store_path
        .map(PathBuf::from)
        .unwrap_or(operator.storage.state_store_path);

    let bot_config = BotConfig::from_env()?;

    info!(
        homeserver = %bot_config.homeserver,
        credentials = %credentials_path.display(),
        state_store = %state_store_path.display(),
        "starting matrixbot"
    );

    let reason = run_bot(&bot_config, &credentials_path, &state_store_path).await?;
    info!(?reason, "matrixbot stopped");
    Ok(())
}

async fn run_bot(
    bot_config: &BotConfig,
    credentials_path: &Path,
    state_store_path: &Path,
) -> Result<ShutdownReason, Box<dyn std::error::Error>> {
    let store = SqliteCredentialStore::open(credentials_path).await?;
    let client = SdkClient::new(bot_config.homeserver.clone(), state_store_path);

    let session = Bootstrapper::new(client, &store, bot_config)
        .bootstrap()
        .await?;

    let sync_task = Supervisor::new(session)
        .with_handler(PingResponder)
        .spawn();

    info!("Bot is running. Press Ctrl+C to exit.");

    let interrupt = async {
        if let Err(e) = interrupt_signal().await {
            error!(error = %e, "failed to install signal handlers");
            futures::future::pending::<()>().await;
        }
    };

    Ok(wait_for_shutdown(sync_task, interrupt).await?)
}
