use anyhow::{bail, Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

/// Top-level linegem configuration, loaded from `config.toml`.
///
/// Resolution order: `LINEGEM_CONFIG_DIR` env → `~/.linegem/config.toml`.
/// Secrets may be supplied (or overridden) through `LINE_CHANNEL_SECRET`,
/// `LINE_CHANNEL_ACCESS_TOKEN` and `GEMINI_API_KEY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Config directory - computed at load time, not serialized
    #[serde(skip)]
    pub config_dir: PathBuf,

    /// LINE messaging channel credentials (`[line]`).
    #[serde(default)]
    pub line: LineConfig,

    /// Gemini model configuration (`[gemini]`).
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Conversation history lifecycle settings (`[history]`).
    #[serde(default)]
    pub history: HistoryConfig,

    /// Webhook gateway bind settings (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// LINE channel credentials (`[line]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineConfig {
    /// Channel secret used to verify `X-Line-Signature` on webhooks.
    pub channel_secret: Option<String>,
    /// Channel access token used for the reply and content APIs.
    pub channel_access_token: Option<String>,
}

/// Gemini provider configuration (`[gemini]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key for the Gemini REST endpoint.
    pub api_key: Option<String>,
    /// Model used for plain text turns. Default: `"gemini-2.0-flash-001"`.
    #[serde(default = "default_text_model")]
    pub text_model: String,
    /// Model used for vision turns. Default: `"gemini-2.0-flash-001"`.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    /// Response token cap. Default: `1024`.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Endpoint base URL override (e.g. a regional proxy).
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Conversation history lifecycle configuration (`[history]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum messages retained in a user's window. Default: `10`.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Seconds of inactivity before a session is flushed and evicted.
    /// Default: `600` (the reference cost-control value; tune freely).
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    /// Seconds between eviction scans. Default: `60`.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Snapshot directory override. Default: `<config_dir>/history`.
    pub dir: Option<PathBuf>,
}

/// Webhook gateway configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_text_model() -> String {
    "gemini-2.0-flash-001".to_string()
}

fn default_vision_model() -> String {
    "gemini-2.0-flash-001".to_string()
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_max_messages() -> usize {
    10
}

fn default_idle_threshold_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            max_output_tokens: default_max_output_tokens(),
            api_base: default_api_base(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            idle_threshold_secs: default_idle_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            dir: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

impl Config {
    /// Resolve the config directory: `LINEGEM_CONFIG_DIR` env override,
    /// otherwise `~/.linegem`.
    pub fn resolve_config_dir(override_dir: Option<&str>) -> PathBuf {
        if let Some(dir) = override_dir {
            return PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("LINEGEM_CONFIG_DIR") {
            if !dir.trim().is_empty() {
                return PathBuf::from(dir);
            }
        }
        UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".linegem"))
            .unwrap_or_else(|| PathBuf::from(".linegem"))
    }

    /// Load config from disk (defaults when absent) and apply env
    /// overrides for secrets.
    pub fn load(override_dir: Option<&str>) -> Result<Self> {
        let config_dir = Self::resolve_config_dir(override_dir);
        let path = config_dir.join("config.toml");

        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Config::default()
        };
        config.config_dir = config_dir;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("LINE_CHANNEL_SECRET") {
            if !secret.trim().is_empty() {
                self.line.channel_secret = Some(secret);
            }
        }
        if let Ok(token) = std::env::var("LINE_CHANNEL_ACCESS_TOKEN") {
            if !token.trim().is_empty() {
                self.line.channel_access_token = Some(token);
            }
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.gemini.api_key = Some(key);
            }
        }
    }

    /// Verify everything the bot needs to run is present. Called once at
    /// startup; nothing on the request path re-validates.
    pub fn validate(&self) -> Result<()> {
        if self.line.channel_secret.as_deref().unwrap_or("").is_empty() {
            bail!("line.channel_secret is required (or set LINE_CHANNEL_SECRET)");
        }
        if self
            .line
            .channel_access_token
            .as_deref()
            .unwrap_or("")
            .is_empty()
        {
            bail!("line.channel_access_token is required (or set LINE_CHANNEL_ACCESS_TOKEN)");
        }
        if self.gemini.api_key.as_deref().unwrap_or("").is_empty() {
            bail!("gemini.api_key is required (or set GEMINI_API_KEY)");
        }
        if self.history.max_messages == 0 {
            bail!("history.max_messages must be at least 1");
        }
        if self.history.sweep_interval_secs == 0 {
            bail!("history.sweep_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Directory holding per-user history snapshots.
    pub fn history_dir(&self) -> PathBuf {
        self.history
            .dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("history"))
    }

    /// Write a commented starter config, refusing to clobber an existing
    /// one.
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("config already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# linegem configuration

[line]
# channel_secret = "..."            # or set LINE_CHANNEL_SECRET
# channel_access_token = "..."      # or set LINE_CHANNEL_ACCESS_TOKEN

[gemini]
# api_key = "..."                   # or set GEMINI_API_KEY
text_model = "gemini-2.0-flash-001"
vision_model = "gemini-2.0-flash-001"
max_output_tokens = 1024

[history]
max_messages = 10
idle_threshold_secs = 600
sweep_interval_secs = 60
# dir = "/var/lib/linegem/history"

[gateway]
host = "0.0.0.0"
port = 8080
"#;
