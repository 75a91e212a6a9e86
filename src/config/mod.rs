use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub replication: ReplicationConfig,
    pub chat: ChatConfig,
    pub livekit: LiveKitConfig,
    pub recording: RecordingConfig,
    pub calls: CallsConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// When false the cache runs local-only and nothing is shared between
    /// processes.
    pub enabled: bool,
    pub redis_url: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messages replayed to a newly opened connection.
    pub history_replay_limit: usize,
    pub default_page_limit: usize,
    pub default_caption_language: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_replay_limit: 50,
            default_page_limit: 100,
            default_caption_language: "zh-CN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveKitConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub url: Option<String>,
    pub token_ttl_seconds: u64,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            url: None,
            token_ttl_seconds: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub egress_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Rooms allowed to record. Empty means every room.
    pub rooms: Vec<String>,
}

impl RecordingConfig {
    pub fn room_enabled(&self, room: &str) -> bool {
        self.rooms.is_empty() || self.rooms.iter().any(|allowed| allowed == room)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub phone_number: Option<String>,
    pub api_base: String,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            account_sid: None,
            auth_token: None,
            phone_number: None,
            api_base: "https://api.twilio.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Loads `path`, writing a default file there first if it does not exist.
    /// Environment overrides are not applied here.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file not found, creating default at {:?}", path);
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies deployment overrides looked up by variable name. Unparseable
    /// values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ROOMSYNC_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ROOMSYNC_PORT").or_else(|| lookup("PORT")) {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid port override: {}", port),
            }
        }

        if let Some(enabled) = lookup("REDIS_ENABLED") {
            override_flag(&mut self.replication.enabled, "REDIS_ENABLED", &enabled);
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.replication.redis_url = url;
        }

        if let Some(key) = lookup("LIVEKIT_API_KEY") {
            self.livekit.api_key = Some(key);
        }
        if let Some(secret) = lookup("LIVEKIT_SECRET") {
            self.livekit.api_secret = Some(secret);
        }
        if let Some(url) = lookup("LIVEKIT_URL") {
            self.livekit.url = Some(url);
        }

        if let Some(enabled) = lookup("RECORDING_ENABLED") {
            override_flag(&mut self.recording.enabled, "RECORDING_ENABLED", &enabled);
        }
        if let Some(url) = lookup("RECORDING_EGRESS_URL") {
            self.recording.egress_url = Some(url);
        }

        if let Some(enabled) = lookup("TWILIO_ENABLED") {
            override_flag(&mut self.calls.enabled, "TWILIO_ENABLED", &enabled);
        }
        if let Some(sid) = lookup("TWILIO_ACCOUNT_SID") {
            self.calls.account_sid = Some(sid);
        }
        if let Some(token) = lookup("TWILIO_AUTH_TOKEN") {
            self.calls.auth_token = Some(token);
        }
        if let Some(number) = lookup("TWILIO_PHONE_NUMBER") {
            self.calls.phone_number = Some(number);
        }

        if let Some(enabled) = lookup("AUDIT_ENABLED") {
            override_flag(&mut self.audit.enabled, "AUDIT_ENABLED", &enabled);
        }
    }
}

fn override_flag(target: &mut bool, name: &str, raw: &str) {
    match parse_flag(raw) {
        Some(value) => *target = value,
        None => warn!("Ignoring invalid boolean for {}: {}", name, raw),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert!(!config.replication.enabled);
        assert_eq!(config.chat.history_replay_limit, 50);
        assert_eq!(config.chat.default_page_limit, 100);
        assert_eq!(config.chat.default_caption_language, "zh-CN");
        assert!(config.audit.enabled);
        assert!(!config.recording.enabled);
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            [replication]
            enabled = true

            [recording]
            rooms = ["studio"]
            "#,
        )
        .unwrap();

        assert!(config.replication.enabled);
        assert_eq!(config.replication.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.server.port, 8000);
        assert!(config.recording.room_enabled("studio"));
        assert!(!config.recording.room_enabled("lobby"));
    }

    #[test]
    fn test_empty_room_list_allows_every_room() {
        assert!(RecordingConfig::default().room_enabled("anything"));
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.server.port, 8000);

        let mut changed = config.clone();
        changed.server.port = 9100;
        changed.livekit.api_key = Some("key".to_string());
        changed.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.server.port, 9100);
        assert_eq!(reloaded.livekit.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_load_from_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("PORT", "9000"),
            ("REDIS_ENABLED", "true"),
            ("REDIS_URL", "redis://cache:6379/1"),
            ("LIVEKIT_API_KEY", "key"),
            ("LIVEKIT_SECRET", "secret"),
            ("RECORDING_ENABLED", "1"),
            ("TWILIO_PHONE_NUMBER", "+15550100"),
            ("AUDIT_ENABLED", "off"),
        ]));

        assert_eq!(config.server.port, 9000);
        assert!(config.replication.enabled);
        assert_eq!(config.replication.redis_url, "redis://cache:6379/1");
        assert_eq!(config.livekit.api_key.as_deref(), Some("key"));
        assert_eq!(config.livekit.api_secret.as_deref(), Some("secret"));
        assert!(config.recording.enabled);
        assert_eq!(config.calls.phone_number.as_deref(), Some("+15550100"));
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_specific_port_wins_and_bad_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("ROOMSYNC_PORT", "7001"),
            ("PORT", "9000"),
            ("REDIS_ENABLED", "maybe"),
        ]));
        assert_eq!(config.server.port, 7001);
        assert!(!config.replication.enabled);

        config.apply_overrides(lookup_from(&[("ROOMSYNC_PORT", "not-a-port")]));
        assert_eq!(config.server.port, 7001);
    }
}
