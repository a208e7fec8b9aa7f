use crate::{
    Config,
    model::{CandidateLocation, WeatherSnapshot},
    provider::weatherapi::WeatherApiProvider,
};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

pub mod weatherapi;

/// City search and forecast lookups backing the screen.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Candidates for a partial city name, in provider order. May be empty.
    async fn search_locations(&self, query: &str) -> anyhow::Result<Vec<CandidateLocation>>;

    /// Current conditions plus `days` of daily forecast for a city name.
    async fn fetch_forecast(&self, city: &str, days: u8) -> anyhow::Result<WeatherSnapshot>;
}

/// Construct the provider described by the config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let api_key = config.require_api_key()?;

    let provider = match config.base_url() {
        Some(base_url) => WeatherApiProvider::with_base_url(api_key.to_owned(), base_url),
        None => WeatherApiProvider::new(api_key.to_owned()),
    };

    Ok(Arc::new(provider))
}
