use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod run;
pub mod status;
pub mod version;

#[derive(Parser)]
#[command(name = "matrixbot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "End-to-end encrypted Matrix bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in (or resume), bring up encryption and run the sync loop
    ///
    /// Account settings come from BOT_HOMESERVER, BOT_USERNAME, BOT_PASSWORD,
    /// BOT_DISPLAY_NAME and BOT_RECOVERY_KEY.
    Run {
        /// Path to operator config file (default: <config dir>/matrixbot/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Path to the credential database (overrides config)
        #[arg(long)]
        credentials: Option<String>,

        /// Path to the encrypted SDK state store (overrides config)
        #[arg(long)]
        state_store: Option<String>,
    },

    /// Show the cached identity, without secrets
    Status {
        /// Path to operator config file
        #[arg(long)]
        config: Option<String>,

        /// Path to the credential database (overrides config)
        #[arg(long)]
        credentials: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            config,
            credentials,
            state_store,
        } => run::execute(config, credentials, state_store).await,
        Commands::Status {
            config,
            credentials,
        } => status::execute(config, credentials).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Already installed (tests) is fine
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["matrixbot", "run"]);

        match cli.command {
            Commands::Run {
                config,
                credentials,
                state_store,
            } => {
                assert!(config.is_none());
                assert!(credentials.is_none());
                assert!(state_store.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_paths() {
        let cli = Cli::parse_from([
            "matrixbot",
            "run",
            "--config",
            "/etc/matrixbot.toml",
            "--credentials",
            "/data/creds.db",
            "--state-store",
            "/data/state.db",
        ]);

        match cli.command {
            Commands::Run {
                config,
                credentials,
                state_store,
            } => {
                assert_eq!(config.as_deref(), Some("/etc/matrixbot.toml"));
                assert_eq!(credentials.as_deref(), Some("/data/creds.db"));
                assert_eq!(state_store.as_deref(), Some("/data/state.db"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from(["matrixbot", "status", "--credentials", "creds.db"]);

        match cli.command {
            Commands::Status { credentials, .. } => {
                assert_eq!(credentials.as_deref(), Some("creds.db"))
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_parse_version() {
        let cli = Cli::parse_from(["matrixbot", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["matrixbot", "register"]).is_err());
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("not a level [");
    }
}
