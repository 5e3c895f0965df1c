//! Configuration
//!
//! Configuration structures for server and client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub users: Vec<UserCredential>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            chat: ChatConfig::default(),
            tokens: TokenConfig::default(),
            storage: StorageConfig::default(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Chat hub limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_replay_count")]
    pub replay_count: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_history_capacity() -> usize {
    100
}

fn default_replay_count() -> usize {
    50
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            replay_count: default_replay_count(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Capability token lifetime settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Zero disables the background sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Which content store backs file bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBackend {
    Memory,
    Fs,
    Ipfs,
}

/// File storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_content_backend")]
    pub content: ContentBackend,
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    #[serde(default = "default_ipfs_api_url")]
    pub ipfs_api_url: String,
    /// Largest accepted upload request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_database_url() -> String {
    "sqlite://cipher-chat.db".to_string()
}

fn default_content_backend() -> ContentBackend {
    ContentBackend::Fs
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("blobs")
}

fn default_ipfs_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            content: default_content_backend(),
            content_dir: default_content_dir(),
            ipfs_api_url: default_ipfs_api_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// A user allowed on the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    pub api_key: String,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_username() -> String {
    "User".to_string()
}

fn default_encrypt() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            username: default_username(),
            api_key: None,
            encrypt: true,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// WebSocket URL of the chat channel
    pub fn ws_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", base)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.chat.history_capacity, 100);
        assert_eq!(config.chat.replay_count, 50);
        assert_eq!(config.tokens.ttl_secs, 1800);
        assert_eq!(config.storage.content, ContentBackend::Fs);
    }

    #[test]
    fn test_partial_server_config() {
        let config = ServerConfig::from_toml(
            r#"
            port = 8080

            [storage]
            database_url = "sqlite::memory:"
            content = "ipfs"

            [[users]]
            username = "alice"
            api_key = "k1"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.storage.content, ContentBackend::Ipfs);
        assert_eq!(config.storage.ipfs_api_url, "http://127.0.0.1:5001");
        assert_eq!(config.tokens.sweep_interval_secs, 300);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].username, "alice");
    }

    #[test]
    fn test_bad_server_config() {
        let result = ServerConfig::from_toml("port = \"nope\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:5000");
        assert!(config.encrypt);
        assert_eq!(config.ws_url(), "ws://127.0.0.1:5000/ws");
    }

    #[test]
    fn test_client_log_level_from_file() {
        let config: ClientConfig = toml::from_str("log_level = \"warn\"").unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.username, "User");
    }

    #[test]
    fn test_client_ws_url_tls() {
        let config = ClientConfig {
            server_url: "https://chat.example.org/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(config.ws_url(), "wss://chat.example.org/ws");
    }
}
