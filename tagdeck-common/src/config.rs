//! Configuration loading and backend URL resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the backend URL
pub const BACKEND_URL_ENV: &str = "TAGDECK_BACKEND_URL";

/// Compiled default backend location (the cataloging engine's dev server)
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5001";

/// Bootstrap configuration loaded from TOML file
///
/// Every field is optional in the file; missing fields take built-in defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Base URL of the cataloging backend (REST and socket endpoints)
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Path prefix of the REST API below `backend_url`
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pointer interaction thresholds
    #[serde(default)]
    pub interaction: InteractionConfig,

    /// Socket reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            api_prefix: default_api_prefix(),
            logging: LoggingConfig::default(),
            interaction: InteractionConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Long-press detection thresholds
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct InteractionConfig {
    /// Hold duration before a touch opens the context menu
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,

    /// Maximum pointer travel (px) before a pending long press is cancelled
    #[serde(default = "default_move_tolerance_px")]
    pub move_tolerance_px: u32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            long_press_ms: default_long_press_ms(),
            move_tolerance_px: default_move_tolerance_px(),
        }
    }
}

/// Exponential backoff bounds for socket reconnects
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_api_prefix() -> String {
    "/api_v1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_long_press_ms() -> u64 {
    500
}

fn default_move_tolerance_px() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from an explicit path, or the platform default location.
    ///
    /// A missing file is not an error: a warning is logged and defaults are used.
    /// A file that exists but does not parse is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_config_file() {
                Ok(p) => p,
                Err(e) => {
                    warn!("{}; using built-in defaults", e);
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            warn!("Config file {:?} not found; using built-in defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}

/// Backend URL resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. Compiled default (fallback)
pub fn resolve_backend_url(cli_arg: Option<&str>, env_var_name: &str, toml: &TomlConfig) -> String {
    // Priority 1: Command-line argument
    if let Some(url) = cli_arg {
        return normalize_url(url);
    }

    // Priority 2: Environment variable
    if let Ok(url) = std::env::var(env_var_name) {
        if !url.trim().is_empty() {
            return normalize_url(&url);
        }
    }

    // Priority 3: TOML config file
    if let Some(url) = toml.backend_url.as_deref() {
        return normalize_url(url);
    }

    // Priority 4: Compiled default
    DEFAULT_BACKEND_URL.to_string()
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Get default configuration file path for the platform
fn default_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tagdeck").join("config.toml"));

    if cfg!(target_os = "linux") {
        // Try ~/.config/tagdeck/config.toml first, then /etc/tagdeck/config.toml
        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/tagdeck/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        user_config.ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }
}
