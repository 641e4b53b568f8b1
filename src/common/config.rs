use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::paths;

pub const ENV_KEY_NAME: &str = "WEBSHARE_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the generation service
    pub base_url: String,
    /// Model identifier sent with every create call
    pub model: String,
    /// Daily spend cap enforced by the budget guard, in USD
    pub daily_budget_usd: f64,
    /// Page size used when listing drafts
    pub draft_page_size: usize,
    /// Proxy listing API key; the .env file or process environment are
    /// consulted when unset
    pub webshare_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sora.chatgpt.com".to_string(),
            model: "sy_8".to_string(),
            daily_budget_usd: 10.0,
            draft_page_size: 10,
            webshare_api_key: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(paths::config_path()?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents).context("parsing config")?;
        if !config.daily_budget_usd.is_finite() || config.daily_budget_usd < 0.0 {
            config.daily_budget_usd = Self::default().daily_budget_usd;
        }
        if config.draft_page_size == 0 {
            config.draft_page_size = Self::default().draft_page_size;
        }
        Ok(config)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, toml)
            .with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }

    /// Resolve the proxy listing API key: config value, then the .env file
    /// next to the config, then the process environment.
    pub fn webshare_api_key(&self) -> Result<String> {
        if let Some(key) = &self.webshare_api_key {
            if !key.trim().is_empty() {
                return Ok(key.trim().to_string());
            }
        }

        if let Some(key) = read_env_file_key(&paths::env_file_path()?) {
            return Ok(key);
        }

        if let Ok(key) = std::env::var(ENV_KEY_NAME) {
            if !key.trim().is_empty() {
                return Ok(key.trim().to_string());
            }
        }

        bail!(
            "{} not configured. Set it in config.toml, a .env file in the config directory, or the environment",
            ENV_KEY_NAME
        );
    }
}

fn read_env_file_key(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        if let Some(value) = line.trim().strip_prefix(&format!("{}=", ENV_KEY_NAME)) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
