//! Application configuration
//!
//! Loaded with the `config` crate from defaults, optional
//! `config/default.toml` and `config/{RUN_MODE}.toml` files, then
//! `SOFTPHONE__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub freeswitch: FreeSwitchConfig,
    #[serde(default)]
    pub softphone: SoftphoneConfig,
}

/// Local control API
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated origins allowed to drive the API from a browser
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9100
}

fn default_workers() -> usize {
    2
}

fn default_cors_origins() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// Backend REST API
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// e.g. `https://crm.example.com/api/v1`
    pub base_url: String,

    /// Bearer token of the agent session
    #[serde(default)]
    pub api_token: Option<String>,

    pub agent_id: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,

    /// Interval of the agent status poll; 0 disables polling
    #[serde(default = "default_status_poll")]
    pub status_poll_secs: u64,
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_status_poll() -> u64 {
    30
}

/// Event Socket endpoint used as the telephony SDK
#[derive(Debug, Deserialize, Clone)]
pub struct FreeSwitchConfig {
    #[serde(default = "default_fs_host")]
    pub host: String,

    #[serde(default = "default_fs_port")]
    pub port: u16,

    #[serde(default = "default_fs_password")]
    pub password: String,

    /// The agent's registered extension (the softphone leg)
    pub extension: String,

    /// Prefix for outbound destinations, e.g. `sofia/gateway/carrier/`
    #[serde(default = "default_dial_prefix")]
    pub dial_prefix: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_fs_host() -> String {
    "127.0.0.1".to_string()
}

fn default_fs_port() -> u16 {
    8021
}

fn default_fs_password() -> String {
    "ClueCon".to_string()
}

fn default_dial_prefix() -> String {
    "sofia/gateway/default/".to_string()
}

fn default_command_timeout() -> u64 {
    10
}

/// Call state and ACW behaviour
#[derive(Debug, Deserialize, Clone)]
pub struct SoftphoneConfig {
    /// How long `ended` stays visible before returning to `idle`
    #[serde(default = "default_ended_display_ms")]
    pub ended_display_ms: u64,

    /// ACW length used when voice settings cannot be fetched
    #[serde(default = "default_acw_secs")]
    pub default_acw_secs: u32,

    /// Connect the SDK and go available at startup
    #[serde(default)]
    pub auto_available: bool,
}

fn default_ended_display_ms() -> u64 {
    2000
}

fn default_acw_secs() -> u32 {
    30
}

impl Default for SoftphoneConfig {
    fn default() -> Self {
        Self {
            ended_display_ms: default_ended_display_ms(),
            default_acw_secs: default_acw_secs(),
            auto_available: false,
        }
    }
}

impl SoftphoneConfig {
    pub fn ended_display(&self) -> Duration {
        Duration::from_millis(self.ended_display_ms)
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.workers", default_workers() as i64)?
            .set_default("server.cors_origins", default_cors_origins())?
            .set_default("backend.timeout_ms", default_request_timeout() as i64)?
            .set_default("backend.status_poll_secs", default_status_poll() as i64)?
            .set_default("freeswitch.host", default_fs_host())?
            .set_default("freeswitch.port", default_fs_port() as i64)?
            .set_default("freeswitch.password", default_fs_password())?
            .set_default("freeswitch.dial_prefix", default_dial_prefix())?
            .set_default("freeswitch.command_timeout_secs", default_command_timeout() as i64)?
            .set_default("softphone.ended_display_ms", default_ended_display_ms() as i64)?
            .set_default("softphone.default_acw_secs", default_acw_secs() as i64)?
            .set_default("softphone.auto_available", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("SOFTPHONE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("SOFTPHONE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerConfig {
    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_softphone_config() {
        let config = SoftphoneConfig::default();
        assert_eq!(config.ended_display(), Duration::from_secs(2));
        assert_eq!(config.default_acw_secs, 30);
        assert!(!config.auto_available);
    }

    #[test]
    fn test_serde_defaults_fill_missing_keys() {
        let toml = r#"
            [backend]
            base_url = "http://localhost:8000/api/v1"
            agent_id = "7"
            [freeswitch]
            extension = "1001"
        "#;

        let config: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server_addr(), "127.0.0.1:9100");
        assert_eq!(config.backend.status_poll_secs, 30);
        assert_eq!(config.freeswitch.password, "ClueCon");
        assert_eq!(config.freeswitch.port, 8021);
        assert!(config.backend.api_token.is_none());
        assert_eq!(config.server.allowed_origins(), vec!["http://localhost:3000"]);
    }
}
