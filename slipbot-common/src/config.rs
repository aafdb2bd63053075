//! Configuration management for slipbot services.
//!
//! The service reads a single configuration file at `~/.slipbot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SLIPBOT_PORT` / `PORT` → server.port
//! - `SLIPBOT_BIND_ADDRESS` → network.bind
//! - `SLIPBOT_LOG_LEVEL` / `LOG_LEVEL` → observability.log_level
//! - `SLIPBOT_SLIP_DIR` → directory.slip_dir
//! - `SLIPBOT_WORKBOOK_PATH` → directory.workbook_path
//! - `SLIPBOT_SNAPSHOT_PATH` → directory.snapshot_path
//! - `WHATSAPP_ACCESS_TOKEN` → whatsapp.access_token
//! - `WHATSAPP_PHONE_NUMBER_ID` → whatsapp.phone_number_id
//! - `WHATSAPP_VERIFY_TOKEN` → whatsapp.verify_token
//! - `WHATSAPP_APP_SECRET` → whatsapp.app_secret

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".slipbot"),
        |dirs| dirs.home_dir().join(".slipbot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Default filename pattern for slip documents. The `empid` group carries the
/// employee id.
pub const DEFAULT_SLIP_FILE_PATTERN: &str = r"(?i)^(?P<empid>[A-Za-z0-9_-]+)_salaryslip\.pdf$";

// ============================================================================
// Network / Server
// ============================================================================

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default "127.0.0.1"; set "0.0.0.0" for remote access.
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

// ============================================================================
// Directory
// ============================================================================

/// Employee directory and slip document locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Flat directory of `<empid>_salaryslip.pdf` files
    #[serde(default = "default_slip_dir")]
    pub slip_dir: PathBuf,

    /// Authoritative employee workbook (xlsx)
    #[serde(default = "default_workbook_path")]
    pub workbook_path: PathBuf,

    /// JSON snapshot backing the live directory cache
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Filename pattern with a named `empid` capture group
    #[serde(default = "default_slip_file_pattern")]
    pub slip_file_pattern: String,

    /// Trailing-edge delay before the cache is written to the snapshot
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            slip_dir: default_slip_dir(),
            workbook_path: default_workbook_path(),
            snapshot_path: default_snapshot_path(),
            slip_file_pattern: default_slip_file_pattern(),
            persist_debounce_ms: default_persist_debounce_ms(),
        }
    }
}

impl DirectoryConfig {
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}

fn default_slip_dir() -> PathBuf {
    PathBuf::from("salary-pdf")
}

fn default_workbook_path() -> PathBuf {
    PathBuf::from("employees.xlsx")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data").join("employees.json")
}

fn default_slip_file_pattern() -> String {
    DEFAULT_SLIP_FILE_PATTERN.into()
}

fn default_persist_debounce_ms() -> u64 {
    500
}

// ============================================================================
// Conversation
// ============================================================================

/// Self-registration conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Keyword that starts the flow (compared trimmed and lowercased)
    #[serde(default = "default_trigger_keyword")]
    pub trigger_keyword: String,

    /// Conversations awaiting an employee id longer than this are swept
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: u64,

    /// How often the sweeper runs
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,

    /// Sign-off used in document captions
    #[serde(default = "default_sender_signature")]
    pub sender_signature: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            trigger_keyword: default_trigger_keyword(),
            max_age_minutes: default_max_age_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
            sender_signature: default_sender_signature(),
        }
    }
}

impl ConversationConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1) * 60)
    }
}

fn default_trigger_keyword() -> String {
    "sobha".into()
}

fn default_max_age_minutes() -> u64 {
    30
}

fn default_sweep_interval_minutes() -> u64 {
    15
}

fn default_sender_signature() -> String {
    "Sobha HR".into()
}

// ============================================================================
// Phone
// ============================================================================

/// Phone number normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    /// Prepended to bare 10-digit numbers when forming a transport address
    #[serde(default = "default_country_code")]
    pub default_country_code: String,

    /// Accepted digit count bounds for API mobile updates
    #[serde(default = "default_min_digits")]
    pub min_digits: usize,

    #[serde(default = "default_max_digits")]
    pub max_digits: usize,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
            min_digits: default_min_digits(),
            max_digits: default_max_digits(),
        }
    }
}

fn default_country_code() -> String {
    "91".into()
}

fn default_min_digits() -> usize {
    8
}

fn default_max_digits() -> usize {
    15
}

// ============================================================================
// WhatsApp
// ============================================================================

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub phone_number_id: String,

    /// Token echoed back during Meta webhook verification
    #[serde(default)]
    pub verify_token: String,

    /// App secret for `X-Hub-Signature-256` verification (optional)
    #[serde(default)]
    pub app_secret: Option<String>,

    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: String::new(),
            phone_number_id: String::new(),
            verify_token: String::new(),
            app_secret: None,
            api_base: default_whatsapp_api_base(),
        }
    }
}

fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com/v18.0".into()
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub phone: PhoneConfig,

    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("SLIPBOT_PORT").or_else(|_| std::env::var("PORT")) {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(bind) = std::env::var("SLIPBOT_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Ok(level) = std::env::var("SLIPBOT_LOG_LEVEL").or_else(|_| std::env::var("LOG_LEVEL"))
        {
            self.observability.log_level = level;
        }

        if let Ok(dir) = std::env::var("SLIPBOT_SLIP_DIR") {
            self.directory.slip_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("SLIPBOT_WORKBOOK_PATH") {
            self.directory.workbook_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SLIPBOT_SNAPSHOT_PATH") {
            self.directory.snapshot_path = PathBuf::from(path);
        }

        if let Ok(token) = std::env::var("WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = token;
        }
        if let Ok(id) = std::env::var("WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = id;
        }
        if let Ok(token) = std::env::var("WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = token;
        }
        if let Ok(secret) = std::env::var("WHATSAPP_APP_SECRET") {
            self.whatsapp.app_secret = Some(secret);
        }
    }

    /// Get the socket address string the HTTP server binds to.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.directory.persist_debounce(), Duration::from_millis(500));
        assert_eq!(config.conversation.max_age(), Duration::from_secs(30 * 60));
        assert_eq!(config.conversation.sweep_interval(), Duration::from_secs(15 * 60));
        assert_eq!(config.phone.default_country_code, "91");
        assert!(!config.whatsapp.enabled);
        assert_eq!(config.listen_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "conversation": {{ "trigger_keyword": "payslip" }}, "observability": {{ "level": "debug" }} }}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.conversation.trigger_keyword, "payslip");
        assert_eq!(config.conversation.max_age_minutes, 30);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.directory.slip_file_pattern, DEFAULT_SLIP_FILE_PATTERN);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}
