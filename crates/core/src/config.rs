use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "VIDUGATE_DATA_DIR";

/// The Vidu API key is taken from the environment only; it is never written
/// to the config file and never logged.
pub const ENV_API_KEY: &str = "VIDUGATE_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub vidu: ViduConfig,
    pub registry: RegistryConfig,
    pub edge: EdgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViduConfig {
    pub api_base_url: String,
    /// Public origin the provider can reach; `/api/vidu-callback` is
    /// appended when building the callback URL for a submission.
    pub callback_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EdgeConfig {
    pub port: u16,
    pub host: String,
    /// Private origin the edge relays callbacks to.
    pub upstream_url: String,
    pub max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            vidu: ViduConfig::default(),
            registry: RegistryConfig::default(),
            edge: EdgeConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3012,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for ViduConfig {
    fn default() -> Self {
        Self {
            api_base_url: crate::vidu::DEFAULT_API_BASE_URL.to_string(),
            callback_base_url: "http://localhost:3012".to_string(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
        }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            host: "0.0.0.0".to_string(),
            upstream_url: "http://127.0.0.1:3012".to_string(),
            max_attempts: crate::forwarder::DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: crate::forwarder::DEFAULT_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl EdgeConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl ViduConfig {
    /// Full callback URL handed to the provider on submission.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/vidu-callback",
            self.callback_base_url.trim_end_matches('/')
        )
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// The Vidu API key, if configured in the environment. Whitespace-only
/// values count as absent.
pub fn api_key_from_env() -> Option<String> {
    env::var(ENV_API_KEY)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. VIDUGATE_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Initialize the data directory structure on first run:
/// - Creates data_dir if missing
/// - Writes default config.toml only if file doesn't exist
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        let default_cfg = AppConfig::default();
        default_cfg.save_to_path(&cfg_path)?;
    }

    Ok(())
}
