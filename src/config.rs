use std::fmt;
use std::fs;
use std::path::PathBuf;

use dotenvy::dotenv;
use error_stack::{IntoReport, Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::Suggestion;

#[derive(Debug)]
pub struct ConfigError;
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Config error")
    }
}
impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = error_stack::Result<T, ConfigError>;

const APP_DIR_NAME: &str = "month-sort";
const CONFIG_FILE_NAME: &str = "config.json";

/// Spotify app credentials used to authenticate against the accounts service.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    /// Resolves credentials from, in order of precedence: CLI flags, the
    /// environment (including a `.env` file), and the config file.
    pub fn resolve(
        cli_client_id: Option<String>,
        cli_client_secret: Option<String>,
    ) -> ConfigResult<Self> {
        dotenv().ok();
        let env_client_id = std::env::var("SPOTIFY_CLIENT_ID").ok();
        let env_client_secret = std::env::var("SPOTIFY_CLIENT_SECRET").ok();

        let file_config = if cli_client_id.is_none() || cli_client_secret.is_none() {
            Self::read_config_file().ok()
        } else {
            None
        };

        let client_id = cli_client_id
            .or(env_client_id)
            .or_else(|| file_config.as_ref().map(|config| config.client_id.clone()))
            .unwrap_or_default();
        let client_secret = cli_client_secret
            .or(env_client_secret)
            .or_else(|| {
                file_config
                    .as_ref()
                    .map(|config| config.client_secret.clone())
            })
            .unwrap_or_default();

        if client_id.is_empty() || client_secret.is_empty() {
            return Err(Report::new(ConfigError)
                .attach_printable(
                    "Client id and secret needed to connect to Spotify's servers",
                )
                .attach(Suggestion(format!(
                    "Pass --client-id and --client-secret, or fill in {}",
                    Self::config_file_path()?.display()
                ))));
        }
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn read_config_file() -> ConfigResult<Self> {
        let config_path = Self::config_file_path()?;
        if !config_path.is_file() {
            return Err(Report::new(ConfigError).attach_printable(format!(
                "Config file not found at: {}",
                config_path.display()
            )));
        }
        let config_content = fs::read_to_string(&config_path)
            .into_report()
            .attach_printable(format!(
                "Failed to read config file at {}",
                config_path.display()
            ))
            .change_context(ConfigError)?;
        let config: Config = serde_json::from_str(&config_content)
            .into_report()
            .attach_printable("Failed to parse the config file. Ensure it is valid JSON.")
            .change_context(ConfigError)?;
        Ok(config)
    }

    pub fn config_file_path() -> ConfigResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or(ConfigError)
            .into_report()
            .attach_printable("Could not determine the platform config directory")?;
        Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

/// Application data directory holding the ledger, the last-run file and the
/// cached credentials. Created on first use.
pub fn appdata_dir() -> ConfigResult<PathBuf> {
    let base = dirs::data_dir()
        .ok_or(ConfigError)
        .into_report()
        .attach_printable("Could not determine the platform data directory")?;
    let dir = base.join(APP_DIR_NAME);
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .into_report()
            .attach_printable(format!("Failed to create directory at {}", dir.display()))
            .change_context(ConfigError)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_take_precedence() {
        let config = Config::resolve(
            Some("cli-id".to_string()),
            Some("cli-secret".to_string()),
        )
        .unwrap();
        assert_eq!(config.client_id, "cli-id");
        assert_eq!(config.client_secret, "cli-secret");
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = Config {
            client_id: "abc".to_string(),
            client_secret: "def".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.client_id, "abc");
        assert_eq!(parsed.client_secret, "def");
    }
}
