//! Server configuration: JSON file plus command-line overrides.

use crate::error::ConfigError;
use crate::validation::ValidationConfig;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use shared::NetworkOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up from the working directory when none is named.
pub const DEFAULT_CONFIG_FILE: &str = "server_config.json";

/// Upper bound on seats, shared by `max_players` and the auto-start threshold.
pub const PLAYER_LIMIT: usize = 10;

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Dedicated brawler game server")]
pub struct Cli {
    /// JSON configuration file
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON configuration file (alternative to the positional form)
    #[arg(long = "config", value_name = "PATH")]
    pub config_flag: Option<PathBuf>,

    /// UDP port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Steam Web API key used to verify auth tickets
    #[arg(long = "steam_web_api_token")]
    pub steam_web_api_token: Option<String>,

    /// Steam ID of the hosting account
    #[arg(long = "host_steamid")]
    pub host_steamid: Option<u64>,

    /// Number of player slots
    #[arg(long = "max_players")]
    pub max_players: Option<usize>,

    /// Start a round when a lone player readies up
    #[arg(long = "auto_start_single_player", action = ArgAction::Set)]
    pub auto_start_single_player: Option<bool>,

    /// Start a round when every seated player readies up
    #[arg(long = "auto_start_multiplayer", action = ArgAction::Set)]
    pub auto_start_multiplayer: Option<bool>,

    /// Ready players needed before a multiplayer auto-start
    #[arg(long = "min_players_for_auto_start")]
    pub min_players_for_auto_start: Option<usize>,

    /// Delay before the first identity service request
    #[arg(long = "auth_delay_ms")]
    pub auth_delay_ms: Option<u64>,

    /// Log every inbound packet at debug level
    #[arg(long = "enable_debug_packet_logging", action = ArgAction::Set)]
    pub enable_debug_packet_logging: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub steam_web_api_token: String,
    pub host_steam_id: u64,
    pub max_players: usize,
    pub auth_delay_ms: u64,
    pub ping_interval_secs: u64,
    pub enable_debug_packet_logging: bool,
    pub game_options: NetworkOptions,
    pub auto_start_single_player: bool,
    pub auto_start_multiplayer: bool,
    pub min_players_for_auto_start: usize,
    pub validation: ValidationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 1337,
            steam_web_api_token: String::new(),
            host_steam_id: 0,
            max_players: 4,
            auth_delay_ms: 1000,
            ping_interval_secs: 5,
            enable_debug_packet_logging: false,
            game_options: NetworkOptions::default(),
            auto_start_single_player: true,
            auto_start_multiplayer: true,
            min_players_for_auto_start: 2,
            validation: ValidationConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Builds the effective configuration: file first, then flags on top.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let path = cli
            .config_flag
            .clone()
            .or_else(|| cli.config.clone())
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        let mut config = match path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(token) = &cli.steam_web_api_token {
            self.steam_web_api_token = token.clone();
        }
        if let Some(id) = cli.host_steamid {
            self.host_steam_id = id;
        }
        if let Some(max) = cli.max_players {
            self.max_players = max;
        }
        if let Some(flag) = cli.auto_start_single_player {
            self.auto_start_single_player = flag;
        }
        if let Some(flag) = cli.auto_start_multiplayer {
            self.auto_start_multiplayer = flag;
        }
        if let Some(min) = cli.min_players_for_auto_start {
            self.min_players_for_auto_start = min;
        }
        if let Some(delay) = cli.auth_delay_ms {
            self.auth_delay_ms = delay;
        }
        if let Some(flag) = cli.enable_debug_packet_logging {
            self.enable_debug_packet_logging = flag;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steam_web_api_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "a Steam Web API token is required".to_string(),
            ));
        }
        if self.host_steam_id == 0 {
            return Err(ConfigError::Invalid("a host Steam ID is required".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        if !(1..=PLAYER_LIMIT).contains(&self.max_players) {
            return Err(ConfigError::Invalid(format!(
                "max players must be between 1 and {}",
                PLAYER_LIMIT
            )));
        }
        if !(2..=PLAYER_LIMIT).contains(&self.min_players_for_auto_start) {
            return Err(ConfigError::Invalid(format!(
                "min players for auto start must be between 2 and {}",
                PLAYER_LIMIT
            )));
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "ping interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auth_delay(&self) -> Duration {
        Duration::from_millis(self.auth_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            steam_web_api_token: "TOKEN".to_string(),
            host_steam_id: 76561198000000001,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 1337);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.auth_delay(), Duration::from_millis(1000));
        assert_eq!(config.ping_interval(), Duration::from_secs(5));
        assert!(config.auto_start_multiplayer);
    }

    #[test]
    fn test_missing_token_is_invalid() {
        let config = ServerConfig {
            steam_web_api_token: "  ".to_string(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_host_is_invalid() {
        let config = ServerConfig {
            host_steam_id: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_player_bounds() {
        assert!(valid_config().validate().is_ok());
        for bad in [0, 11] {
            let config = ServerConfig {
                max_players: bad,
                ..valid_config()
            };
            assert!(config.validate().is_err(), "max_players {} accepted", bad);
        }
        let config = ServerConfig {
            min_players_for_auto_start: 1,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_uses_defaults_for_missing_fields() {
        let config: ServerConfig = serde_json::from_str(
            r#"{ "port": 4000, "steam_web_api_token": "abc", "host_steam_id": 7,
                 "game_options": { "hp_option": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.game_options.hp_option, 2);
        assert_eq!(config.game_options.map_option, 0);
        assert_eq!(config.validation.max_movement_per_update, 5.0);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "server",
            "--port",
            "9000",
            "--steam_web_api_token",
            "KEY",
            "--host_steamid",
            "76561198000000001",
            "--max_players",
            "8",
            "--auto_start_multiplayer",
            "false",
        ])
        .unwrap();

        let mut config = ServerConfig::default();
        config.apply_overrides(&cli);
        assert_eq!(config.port, 9000);
        assert_eq!(config.steam_web_api_token, "KEY");
        assert_eq!(config.host_steam_id, 76561198000000001);
        assert_eq!(config.max_players, 8);
        assert!(!config.auto_start_multiplayer);
        assert!(config.auto_start_single_player);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_positional_config_path() {
        let cli = Cli::try_parse_from(["server", "custom.json", "--port", "1"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.json")));
        assert_eq!(cli.port, Some(1));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = ServerConfig::load(Path::new("definitely/not/here.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
