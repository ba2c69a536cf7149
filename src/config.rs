//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub rooms: RoomsConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backend implementation to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted PostgREST + RPC service
    Rest,
    /// In-process stand-in, nothing survives a restart
    Memory,
}

/// Hosted backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,

    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: Option<String>,

    /// Public (anon) API key
    pub anon_key: Option<String>,

    #[serde(default = "default_tasks_table")]
    pub tasks_table: String,

    #[serde(default = "default_pet_table")]
    pub pet_table: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Subscribe to the realtime change feed in addition to polling
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Rest
}

fn default_tasks_table() -> String {
    "tasks".to_string()
}

fn default_pet_table() -> String {
    "cat".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_realtime() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            url: None,
            anon_key: None,
            tasks_table: default_tasks_table(),
            pet_table: default_pet_table(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            realtime: default_realtime(),
        }
    }
}

impl BackendConfig {
    /// In-memory backend configuration, for tests and offline use
    pub fn memory() -> Self {
        Self {
            kind: BackendKind::Memory,
            ..Default::default()
        }
    }
}

/// Room and panel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    #[serde(default = "default_room")]
    pub default_room: String,

    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Stop a room nobody has used for this long (0 keeps rooms forever)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_left_label")]
    pub left_label: String,

    #[serde(default = "default_right_label")]
    pub right_label: String,
}

fn default_room() -> String {
    "default".to_string()
}

fn default_max_rooms() -> usize {
    64
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_left_label() -> String {
    "NA".to_string()
}

fn default_right_label() -> String {
    "NK".to_string()
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            max_rooms: default_max_rooms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            left_label: default_left_label(),
            right_label: default_right_label(),
        }
    }
}

impl RoomsConfig {
    /// `None` when idle rooms are kept forever
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn label_for(&self, side: crate::backend::Side) -> &str {
        match side {
            crate::backend::Side::Left => &self.left_label,
            crate::backend::Side::Right => &self.right_label,
        }
    }
}

/// Polling and timer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_tasks_ms")]
    pub tasks_ms: u64,

    #[serde(default = "default_pet_ms")]
    pub pet_ms: u64,

    #[serde(default = "default_coins_ms")]
    pub coins_ms: u64,

    #[serde(default = "default_decay_enabled")]
    pub decay_enabled: bool,

    #[serde(default = "default_decay_secs")]
    pub decay_secs: u64,

    #[serde(default = "default_animation_hold_secs")]
    pub animation_hold_secs: u64,
}

fn default_tasks_ms() -> u64 {
    1000
}

fn default_pet_ms() -> u64 {
    1000
}

fn default_coins_ms() -> u64 {
    2000
}

fn default_decay_enabled() -> bool {
    true
}

fn default_decay_secs() -> u64 {
    60
}

fn default_animation_hold_secs() -> u64 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tasks_ms: default_tasks_ms(),
            pet_ms: default_pet_ms(),
            coins_ms: default_coins_ms(),
            decay_enabled: default_decay_enabled(),
            decay_secs: default_decay_secs(),
            animation_hold_secs: default_animation_hold_secs(),
        }
    }
}

impl PollingConfig {
    pub fn tasks_interval(&self) -> Duration {
        Duration::from_millis(self.tasks_ms)
    }

    pub fn pet_interval(&self) -> Duration {
        Duration::from_millis(self.pet_ms)
    }

    pub fn coins_interval(&self) -> Duration {
        Duration::from_millis(self.coins_ms)
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_secs)
    }

    pub fn animation_hold(&self) -> Duration {
        Duration::from_secs(self.animation_hold_secs)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `cat/*.gif` and `sounds/*.mp3`
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,

    #[serde(default = "default_max_connections")]
    pub max_ws_connections: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_assets_dir() -> String {
    "./public".to_string()
}

fn default_max_connections() -> usize {
    1000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            assets_dir: default_assets_dir(),
            max_ws_connections: default_max_connections(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pawpair").join("config.toml")),
            Some(PathBuf::from("/etc/pawpair/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check settings that would only fail later at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.kind == BackendKind::Rest {
            if self.backend.url.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid(
                    "backend.url is required for the rest backend (or set PAWPAIR_BACKEND_URL)"
                        .to_string(),
                ));
            }
            if self.backend.anon_key.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid(
                    "backend.anon_key is required for the rest backend (or set PAWPAIR_BACKEND_KEY)"
                        .to_string(),
                ));
            }
        }

        let p = &self.polling;
        if p.tasks_ms == 0 || p.pet_ms == 0 || p.coins_ms == 0 || p.decay_secs == 0 {
            return Err(ConfigError::Invalid(
                "polling intervals must be greater than zero".to_string(),
            ));
        }

        if self.rooms.default_room.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "rooms.default_room must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Backend overrides, with the hosted service's conventional names as fallback
        if let Some(url) = env_first(&["PAWPAIR_BACKEND_URL", "SUPABASE_URL"]) {
            self.backend.url = Some(url);
        }
        if let Some(key) = env_first(&["PAWPAIR_BACKEND_KEY", "SUPABASE_ANON_KEY"]) {
            self.backend.anon_key = Some(key);
        }
        if let Ok(kind) = std::env::var("PAWPAIR_BACKEND_KIND") {
            match kind.to_lowercase().as_str() {
                "rest" => self.backend.kind = BackendKind::Rest,
                "memory" => self.backend.kind = BackendKind::Memory,
                other => tracing::warn!("Ignoring unknown PAWPAIR_BACKEND_KIND: {}", other),
            }
        }

        // API overrides
        if let Ok(host) = std::env::var("PAWPAIR_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("PAWPAIR_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        if let Ok(room) = std::env::var("PAWPAIR_ROOM") {
            self.rooms.default_room = room;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("PAWPAIR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PAWPAIR_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_first(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pawpair Configuration
#
# Environment variables override these settings:
# - PAWPAIR_BACKEND_URL (or SUPABASE_URL)
# - PAWPAIR_BACKEND_KEY (or SUPABASE_ANON_KEY)
# - PAWPAIR_BACKEND_KIND
# - PAWPAIR_API_HOST
# - PAWPAIR_API_PORT
# - PAWPAIR_ROOM
# - PAWPAIR_LOG_LEVEL
# - PAWPAIR_LOG_FORMAT

[backend]
# rest (hosted service) or memory (nothing persists)
kind = "rest"

# Project URL and public API key
url = "https://your-project.supabase.co"
anon_key = ""

# Table names
tasks_table = "tasks"
pet_table = "cat"

# Per-request timeout and retry budget for idempotent calls
request_timeout_ms = 5000
max_retries = 3

# Subscribe to row changes over websocket (polling still runs)
realtime = true

[rooms]
default_room = "default"
max_rooms = 64
# Stop rooms idle this long without websocket viewers (0 = never)
idle_timeout_secs = 1800
left_label = "NA"
right_label = "NK"

[polling]
# Checklist and pet refresh (ms)
tasks_ms = 1000
pet_ms = 1000

# Coin balance refresh (ms)
coins_ms = 2000

# Meter decay: every meter loses 1 point per interval
decay_enabled = true
decay_secs = 60

# How long an action animation plays before returning to idle
animation_hold_secs = 10

[api]
host = "0.0.0.0"
port = 3000

# Directory holding cat/*.gif and sounds/*.mp3
assets_dir = "./public"

max_ws_connections = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
