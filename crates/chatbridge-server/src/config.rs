//! Server configuration.

use anyhow::{bail, Result};
use chatbridge_core::{ChannelConfig, ClientConfig, Credentials, HttpEndpoints, ParserOptions};
use chatbridge_types::RoomId;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_USERNAME: &str = "CHATBRIDGE_USERNAME";
pub const ENV_PASSWORD: &str = "CHATBRIDGE_PASSWORD";
pub const ENV_ROOMS: &str = "CHATBRIDGE_ROOMS";
pub const ENV_DB_PATH: &str = "CHATBRIDGE_DB_PATH";

/// Longest accepted relogin interval: one year.
pub const MAX_RELOGIN_INTERVAL_HOURS: u64 = 24 * 365;

const SECS_PER_HOUR: u64 = 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Rooms joined at startup.
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub channel: ChannelTimings,
    #[serde(default)]
    pub upstream: HttpEndpoints,
    /// Replace emoticon images with their text codes in message bodies.
    #[serde(default)]
    pub substitute_emoticons: bool,
    /// Hours between scheduled relogins; 0 disables them.
    #[serde(default = "default_relogin_interval_hours")]
    pub relogin_interval_hours: u64,
    /// Timeout of upstream requests other than the event stream.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Channel timings in whole seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelTimings {
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatbridge")
        .join("messages.db")
}

fn default_relogin_interval_hours() -> u64 {
    6
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_reconnect_base_secs() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_base_secs: default_reconnect_base_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            credentials: CredentialsConfig::default(),
            rooms: Vec::new(),
            channel: ChannelTimings::default(),
            upstream: HttpEndpoints::default(),
            substitute_emoticons: false,
            relogin_interval_hours: default_relogin_interval_hours(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Config::default())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(username) = get(ENV_USERNAME) {
            self.credentials.username = username;
        }
        if let Some(password) = get(ENV_PASSWORD) {
            self.credentials.password = password;
        }
        if let Some(rooms) = get(ENV_ROOMS) {
            self.rooms = rooms
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(db_path) = get(ENV_DB_PATH) {
            self.db_path = PathBuf::from(db_path);
        }
    }

    /// Reject configurations that cannot log in.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.username.trim().is_empty() {
            bail!("No username configured (set {} or [credentials] username)", ENV_USERNAME);
        }
        if self.credentials.password.is_empty() {
            bail!("No password configured (set {} or [credentials] password)", ENV_PASSWORD);
        }
        if self.channel.heartbeat_secs == 0 || self.channel.keepalive_secs == 0 {
            bail!("Channel keepalive and heartbeat intervals must be positive");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        if self.relogin_interval_hours > MAX_RELOGIN_INTERVAL_HOURS {
            bail!(
                "relogin_interval_hours must be at most {} (got {})",
                MAX_RELOGIN_INTERVAL_HOURS,
                self.relogin_interval_hours
            );
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.credentials.username, &self.credentials.password)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|r| RoomId::new(r.as_str())).collect()
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            keepalive_interval: Duration::from_secs(self.channel.keepalive_secs),
            heartbeat_timeout: Duration::from_secs(self.channel.heartbeat_secs),
            reconnect_base_delay: Duration::from_secs(self.channel.reconnect_base_secs),
            max_reconnect_attempts: self.channel.max_reconnect_attempts,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            channel: self.channel_config(),
            parser: ParserOptions {
                substitute_emoticons: self.substitute_emoticons,
            },
            ..ClientConfig::default()
        }
    }

    /// Interval of the scheduled relogin, if enabled and representable.
    pub fn relogin_interval(&self) -> Option<Duration> {
        match self.relogin_interval_hours {
            0 => None,
            hours => hours.checked_mul(SECS_PER_HOUR).map(Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
