/// `load_config` module: Loads the static YAML config, applies environment overrides, and reads secrets.
///
/// This module is the only place where untrusted YAML and environment variables are turned into
/// strongly-typed settings for the relay.
///
/// # Responsibilities
/// - Parse the optional YAML file into [`RelayConfig`], filling every omitted key with its default
/// - Apply deployment overrides from the environment (`GITHUB_REPO`, `TELEGRAM_API_BASE`/`BOT_API_BASE`,
///   `RELEASE_TAG`, `RELEASE_TAG_PREFIX`, `PORT`)
/// - Read secrets (`BOT_TOKEN`, `GITHUB_TOKEN`) from the environment only; they never live in the file
/// - Validate the merged result so the CLI can fail fast with a clear message
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use release_relay_core::stream::DEFAULT_CHUNK_SIZE;
use release_relay_core::RetryPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::naming::TagPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub telegram: TelegramSection,
    pub github: GitHubSection,
    pub release: ReleaseSection,
    pub transfer: TransferSection,
    pub bot: BotSection,
    pub health: HealthSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    /// Bot API server, e.g. a self-hosted `telegram-bot-api` instance.
    pub api_base: String,
    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    /// `owner/name` of the repository holding the releases.
    pub repo: String,
    pub api_base: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            repo: String::new(),
            api_base: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReleaseSection {
    /// Fixed tag for every upload. When absent a daily tag is derived from `tag_prefix`.
    pub tag: Option<String>,
    pub tag_prefix: String,
}

impl Default for ReleaseSection {
    fn default() -> Self {
        Self {
            tag: None,
            tag_prefix: "uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub chunk_size: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSection {
    /// Accepted document extensions (case-insensitive). Empty accepts everything.
    pub allowed_extensions: Vec<String>,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            allowed_extensions: vec![".ipa".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl RelayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.transfer.max_attempts,
            Duration::from_millis(self.transfer.base_delay_ms),
        )
    }

    pub fn tag_policy(&self) -> TagPolicy {
        match &self.release.tag {
            Some(tag) => TagPolicy::Fixed(tag.clone()),
            None => TagPolicy::Daily {
                prefix: self.release.tag_prefix.clone(),
            },
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            repo = %self.github.repo,
            telegram_api = %self.telegram.api_base,
            tag = ?self.release.tag,
            tag_prefix = %self.release.tag_prefix,
            max_attempts = self.transfer.max_attempts,
            chunk_size = self.transfer.chunk_size,
            health_port = self.health.port,
            "Loaded RelayConfig"
        );
        debug!(?self, "RelayConfig loaded (full debug)");
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(repo) = env_value("GITHUB_REPO") {
            self.github.repo = repo;
        }
        if let Some(base) = env_value("TELEGRAM_API_BASE").or_else(|| env_value("BOT_API_BASE")) {
            self.telegram.api_base = base;
        }
        if let Some(tag) = env_value("RELEASE_TAG") {
            self.release.tag = Some(tag);
        }
        if let Some(prefix) = env_value("RELEASE_TAG_PREFIX") {
            self.release.tag_prefix = prefix;
        }
        if let Some(port) = env_value("PORT") {
            self.health.port = port
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got {port:?}"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let repo_ok = self
            .github
            .repo
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
        if !repo_ok {
            anyhow::bail!(
                "github.repo must have the form owner/name (or set GITHUB_REPO), got {:?}",
                self.github.repo
            );
        }
        if self.transfer.max_attempts == 0 {
            anyhow::bail!("transfer.max_attempts must be at least 1");
        }
        if self.transfer.chunk_size == 0 {
            anyhow::bail!("transfer.chunk_size must be greater than 0");
        }
        if self.release.tag.as_deref().is_some_and(str::is_empty) {
            anyhow::bail!("release.tag must not be empty when set");
        }
        Ok(())
    }
}

/// Secrets read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub github_token: String,
    pub bot_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("github_token", &"<redacted>")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    /// `GITHUB_TOKEN` is always required; `BOT_TOKEN` only when `need_bot` is set.
    pub fn from_env(need_bot: bool) -> Result<Self> {
        let github_token = match env_value("GITHUB_TOKEN") {
            Some(token) => token,
            None => {
                error!("GITHUB_TOKEN environment variable not set");
                anyhow::bail!("GITHUB_TOKEN environment variable not set");
            }
        };
        let bot_token = env_value("BOT_TOKEN");
        if need_bot && bot_token.is_none() {
            error!("BOT_TOKEN environment variable not set");
            anyhow::bail!("BOT_TOKEN environment variable not set");
        }
        info!(bot_token_set = bot_token.is_some(), "Secrets loaded from environment");
        Ok(Secrets {
            github_token,
            bot_token,
        })
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Loads the YAML config at `path` (or pure defaults when `None`), then applies env overrides
/// and validates the result.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let mut config = match path {
        Some(path_ref) => {
            info!(config_path = ?path_ref, "Loading configuration from file");
            let config_content = match fs::read_to_string(path_ref) {
                Ok(content) => {
                    info!(config_path = ?path_ref, "Config file read successfully");
                    content
                }
                Err(e) => {
                    error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
                    return Err(anyhow::anyhow!(
                        "Failed to read config file {:?}: {}",
                        path_ref,
                        e
                    ));
                }
            };

            if config_content.trim().is_empty() {
                RelayConfig::default()
            } else {
                match serde_yaml::from_str::<RelayConfig>(&config_content) {
                    Ok(conf) => {
                        info!(config_path = ?path_ref, "Parsed config YAML successfully");
                        conf
                    }
                    Err(e) => {
                        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                        return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
                    }
                }
            }
        }
        None => {
            info!("No config file given, using defaults and environment");
            RelayConfig::default()
        }
    };

    config.apply_env_overrides()?;
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e);
    }
    config.trace_loaded();
    Ok(config)
}
