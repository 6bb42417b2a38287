//! Bootstrap configuration from the process environment.
//!
//! Read once at startup into an immutable `BotConfig` that is passed by
//! reference into the bootstrapper. Operator settings (paths, logging) live in
//! the CLI's TOML config instead.

use std::fmt;
use tracing::warn;

pub const ENV_HOMESERVER: &str = "BOT_HOMESERVER";
pub const ENV_USERNAME: &str = "BOT_USERNAME";
pub const ENV_PASSWORD: &str = "BOT_PASSWORD";
pub const ENV_DISPLAY_NAME: &str = "BOT_DISPLAY_NAME";
pub const ENV_RECOVERY_KEY: &str = "BOT_RECOVERY_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing {0} env var")]
    MissingVar(&'static str),
}

/// Bootstrap configuration, immutable for the process lifetime
#[derive(Clone)]
pub struct BotConfig {
    pub homeserver: String,
    pub display_name: String,
    pub username: String,
    pub password: String,
    /// Enables one-time cross-signing verification after the first sync
    pub recovery_key: Option<String>,
}

impl BotConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::MissingVar(name));

        let homeserver = required(ENV_HOMESERVER)?;
        let username = required(ENV_USERNAME)?;
        let password = required(ENV_PASSWORD)?;
        let display_name = lookup(ENV_DISPLAY_NAME).unwrap_or_else(|| username.clone());

        let recovery_key = lookup(ENV_RECOVERY_KEY).filter(|key| !key.trim().is_empty());
        if recovery_key.is_none() {
            warn!(
                "missing {} env var, session verification will be disabled",
                ENV_RECOVERY_KEY
            );
        }

        Ok(Self {
            homeserver,
            display_name,
            username,
            password,
            recovery_key,
        })
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("homeserver", &self.homeserver)
            .field("display_name", &self.display_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("recovery_key", &self.recovery_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        (ENV_HOMESERVER, "https://matrix.example.org"),
        (ENV_USERNAME, "bot"),
        (ENV_PASSWORD, "hunter2"),
    ];

    #[test]
    fn test_required_vars_only() {
        let config = BotConfig::from_lookup(lookup_from(&REQUIRED)).unwrap();

        assert_eq!(config.homeserver, "https://matrix.example.org");
        assert_eq!(config.username, "bot");
        assert_eq!(config.password, "hunter2");
        // Display name falls back to the username
        assert_eq!(config.display_name, "bot");
        assert!(config.recovery_key.is_none());
    }

    #[test]
    fn test_optional_vars() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_DISPLAY_NAME, "Helper Bot"));
        vars.push((ENV_RECOVERY_KEY, "EsTc 1234 abcd"));

        let config = BotConfig::from_lookup(lookup_from(&vars)).unwrap();

        assert_eq!(config.display_name, "Helper Bot");
        assert_eq!(config.recovery_key.as_deref(), Some("EsTc 1234 abcd"));
    }

    #[test]
    fn test_blank_recovery_key_disables_verification() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_RECOVERY_KEY, "  "));

        let config = BotConfig::from_lookup(lookup_from(&vars)).unwrap();
        assert!(config.recovery_key.is_none());
    }

    #[test]
    fn test_each_required_var_is_enforced() {
        for missing in [ENV_HOMESERVER, ENV_USERNAME, ENV_PASSWORD] {
            let vars: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
            match BotConfig::from_lookup(lookup_from(&vars)) {
                Err(ConfigError::MissingVar(name)) => assert_eq!(name, missing),
                Ok(_) => panic!("Expected {} to be required", missing),
            }
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_RECOVERY_KEY, "EsTc secret"));
        let config = BotConfig::from_lookup(lookup_from(&vars)).unwrap();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("EsTc secret"));
    }
}
