//! Layered TOML configuration for mcpilot.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use mcpilot_mcp::{McpConfig, ServerDescriptor};
use mcpilot_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// The default model to use.
pub const DEFAULT_MODEL: &str = "llama3.1";

/// The default model request timeout (5 minutes; local models can be slow).
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 300_000;

/// Resolved configuration for an mcpilot session.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub base_url: String,
    pub model_timeout: Duration,
    /// Retries for transient model API errors; 0 disables retrying.
    pub max_retries: u32,
    pub mcp: McpConfig,
    pub config_dir: PathBuf,
    /// The file settings were read from, if one existed.
    pub config_file: Option<PathBuf>,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub mcp: McpConfig,
}

/// The `[model]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit config file. Unlike the default location, it must exist
    /// and parse.
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`MCPILOT_MODEL`, `OLLAMA_HOST`)
    /// 3. Config file (`--config`, else `~/.mcpilot/config.toml`)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_with_env(overrides, |key| std::env::var(key).ok())
    }

    /// Like [`AppConfig::load`], reading environment variables through `env`.
    pub fn load_with_env<E>(overrides: CliOverrides, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config_dir = config_dir_from(&env);

        let (settings, config_file) = match &overrides.config_path {
            Some(path) => (load_explicit_file(path)?, Some(path.clone())),
            None => {
                let path = config_dir.join("config.toml");
                match load_settings_file(&path) {
                    Some(settings) => (settings, Some(path)),
                    None => (SettingsFile::default(), None),
                }
            }
        };

        let model = overrides
            .model
            .or_else(|| env("MCPILOT_MODEL"))
            .or(settings.model.name)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = overrides
            .base_url
            .or_else(|| env("OLLAMA_HOST"))
            .or(settings.model.base_url)
            .map(|url| normalize_base_url(&url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let config = AppConfig {
            model,
            base_url,
            model_timeout: Duration::from_millis(
                settings.model.timeout_ms.unwrap_or(DEFAULT_MODEL_TIMEOUT_MS),
            ),
            max_retries: settings.model.max_retries.unwrap_or(0),
            mcp: settings.mcp,
            config_dir,
            config_file,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.model.trim().is_empty() {
            return Err(invalid("model.name", "must not be empty"));
        }
        if self.model_timeout.is_zero() {
            return Err(invalid("model.timeout_ms", "must be greater than zero"));
        }
        let timeouts = [
            ("mcp.connect_timeout_ms", self.mcp.connect_timeout_ms),
            ("mcp.discovery_timeout_ms", self.mcp.discovery_timeout_ms),
            ("mcp.call_timeout_ms", self.mcp.call_timeout_ms),
            ("mcp.shutdown_timeout_ms", self.mcp.shutdown_timeout_ms),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(invalid(key, "must be greater than zero"));
        }
        if self.mcp.max_concurrent_connections == 0 {
            return Err(invalid(
                "mcp.max_concurrent_connections",
                "must be at least 1",
            ));
        }
        if let Some((name, _)) = self
            .mcp
            .servers
            .iter()
            .find(|(_, server)| server.command.trim().is_empty())
        {
            return Err(invalid(
                &format!("mcp.servers.{name}.command"),
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Server descriptors in registration order.
    pub fn server_descriptors(&self) -> Vec<ServerDescriptor> {
        self.mcp.descriptors()
    }
}

/// Get the mcpilot config directory path (~/.mcpilot/).
pub fn config_dir() -> PathBuf {
    config_dir_from(|key| std::env::var(key).ok())
}

fn config_dir_from<E>(env: E) -> PathBuf
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env("MCPILOT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcpilot")
}

/// `OLLAMA_HOST` is often given as `host:port`; default the scheme.
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Load and parse the default settings file. A missing file yields `None`;
/// an unreadable or malformed one is logged and also yields `None`.
fn load_settings_file(path: &Path) -> Option<SettingsFile> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match toml::from_str(&content) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

/// Load a file named on the command line. Every failure is an error.
fn load_explicit_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
