use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::policy::PolicyKind;

/// Main configuration structure for treeline
///
/// Loaded once at startup and passed by reference to every component; no
/// component reads configuration from ambient state.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Remote store endpoint and credentials
    pub server: ServerConfig,

    /// Local tree and journal locations
    #[serde(default)]
    pub local: LocalConfig,

    /// Reconciliation behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote store connection settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Base URI of the remote store API
    pub endpoint: String,

    /// Acting identity; also the suffix used for collision renames
    pub username: String,

    /// Basic-auth password
    #[serde(default)]
    pub password: String,

    /// Transfer and digest buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Local filesystem settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalConfig {
    /// Root prefix under which every synchronized folder lives
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Journal file path (defaults to the XDG data location)
    pub journal: Option<String>,
}

/// Reconciliation settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Conflict policy variant
    #[serde(default = "default_policy")]
    pub policy: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_buffer_size() -> usize {
    65536
}
fn default_prefix() -> String {
    "${HOME}/treeline".to_string()
}
fn default_policy() -> String {
    "default".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            journal: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                endpoint: "http://localhost:8080/api".to_string(),
                username: String::new(),
                password: String::new(),
                buffer_size: default_buffer_size(),
            },
            local: LocalConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }
            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;
        Ok(config_dir.join("treeline").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.local.prefix = shellexpand::full(&self.local.prefix)
            .context("Failed to expand local prefix path")?
            .into_owned();

        if let Some(journal) = &self.local.journal {
            self.local.journal = Some(
                shellexpand::full(journal)
                    .context("Failed to expand journal path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Resolve the journal file path
    pub fn journal_path(&self) -> Result<PathBuf> {
        match &self.local.journal {
            Some(path) => Ok(PathBuf::from(path)),
            None => crate::journal::Journal::default_path(),
        }
    }

    /// Parse the configured conflict policy variant
    pub fn policy_kind(&self) -> Result<PolicyKind> {
        match self.sync.policy.as_str() {
            "default" => Ok(PolicyKind::Default),
            other => bail!("Unknown conflict policy: {}", other),
        }
    }

    /// Reject configurations that cannot reach the remote store
    pub fn validate(&self) -> Result<()> {
        if self.server.endpoint.trim().is_empty() {
            bail!("server.endpoint must be set");
        }
        if self.server.username.trim().is_empty() {
            bail!("server.username must be set (it is also the rename identity)");
        }
        if self.server.buffer_size == 0 {
            bail!("server.buffer_size must be greater than zero");
        }
        Ok(())
    }
}
