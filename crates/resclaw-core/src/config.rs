//! Resclaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ResclawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResclawConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub uipath: UiPathConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for ResclawConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            uipath: UiPathConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ResclawConfig {
    /// Load config from the default path (~/.resclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResclawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ResclawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ResclawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Resclaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".resclaw")
    }
}

/// Gateway (HTTP server) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Token required for admin CRUD routes. Empty = no auth (development).
    /// External callback and health routes are always public.
    #[serde(default)]
    pub admin_token: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_token: String::new(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.resclaw/resclaw.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// UiPath automation API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiPathConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Timeout for the credential-exchange call (shorter than the send).
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    /// Timeout for the reservation dispatch call.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Tokens are refreshed this many seconds before their reported expiry.
    #[serde(default = "default_refresh_margin")]
    pub token_refresh_margin_secs: u64,
}

fn default_auth_timeout() -> u64 { 30 }
fn default_send_timeout() -> u64 { 60 }
fn default_refresh_margin() -> u64 { 60 }

impl Default for UiPathConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            auth_timeout_secs: default_auth_timeout(),
            send_timeout_secs: default_send_timeout(),
            token_refresh_margin_secs: default_refresh_margin(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Misfire grace window: a timer firing this late still dispatches.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
}

fn default_grace() -> u64 { 300 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { grace_secs: default_grace() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResclawConfig::default();
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.scheduler.grace_secs, 300);
        assert_eq!(config.uipath.auth_timeout_secs, 30);
        assert_eq!(config.uipath.send_timeout_secs, 60);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [gateway]
            host = "0.0.0.0"
            port = 8080

            [uipath]
            api_url = "https://automation.example.com/api"
            client_id = "robot-1"

            [scheduler]
            grace_secs = 120
        "#;

        let config: ResclawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.uipath.api_url, "https://automation.example.com/api");
        assert_eq!(config.uipath.client_id, "robot-1");
        assert_eq!(config.scheduler.grace_secs, 120);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let toml_str = "";
        let config: ResclawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.uipath.token_refresh_margin_secs, 60);
        assert!(config.gateway.admin_token.is_empty());
    }

    #[test]
    fn test_home_dir() {
        let home = ResclawConfig::home_dir();
        assert!(home.to_string_lossy().contains("resclaw"));
    }
}
