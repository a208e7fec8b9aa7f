use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CITY: &str = "chennai";
pub const DEFAULT_FORECAST_DAYS: u8 = 7;
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 1200;
pub const DEFAULT_MIN_QUERY_CHARS: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Credentials and endpoint for WeatherAPI.com.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Overrides `https://api.weatherapi.com/v1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Tunables for the search/select flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSettings {
    /// City loaded at startup when nothing has been persisted yet.
    pub default_city: String,
    pub forecast_days: u8,
    pub search_debounce_ms: u64,
    /// Queries shorter than this (in chars) never reach the search provider.
    pub min_query_chars: usize,
    pub request_timeout_secs: u64,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            default_city: DEFAULT_CITY.to_string(),
            forecast_days: DEFAULT_FORECAST_DAYS,
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            min_query_chars: DEFAULT_MIN_QUERY_CHARS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ScreenSettings {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Length is the raw char count; no trimming.
    pub fn is_searchable(&self, query: &str) -> bool {
        query.chars().count() >= self.min_query_chars
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where the last selected city is remembered. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Example TOML:
    /// [weatherapi]
    /// api_key = "..."
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weatherapi: Option<ProviderConfig>,

    #[serde(default)]
    pub screen: ScreenSettings,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Path to the persisted-city file.
    pub fn store_file_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("state.json")),
        }
    }

    /// Set/replace the API key, keeping any custom base URL.
    pub fn set_api_key(&mut self, api_key: String) {
        match &mut self.weatherapi {
            Some(provider) => provider.api_key = api_key,
            None => self.weatherapi = Some(ProviderConfig { api_key, base_url: None }),
        }
    }

    /// Returns the API key, if present.
    pub fn api_key(&self) -> Option<&str> {
        self.weatherapi
            .as_ref()
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key().ok_or_else(|| {
            anyhow!(
                "No API key configured for WeatherAPI.com.\n\
                 Hint: run `cityweather configure` and enter your API key."
            )
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.weatherapi.as_ref().and_then(|cfg| cfg.base_url.as_deref())
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "cityweather", "cityweather")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}
