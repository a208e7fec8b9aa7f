use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cityweather_core::{
    CandidateLocation, Config, FileStore, ScreenController, ScreenHandle, ScreenState,
    provider_from_config,
};
use inquire::{Confirm, InquireError, Password, PasswordDisplayMode, Select, Text};

use crate::render;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "cityweather", version, about = "City search and weather forecast")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the WeatherAPI.com key and the default city.
    Configure,

    /// Show the forecast for a city, or for the last selected city.
    Show {
        /// City name; if absent, the remembered (or default) city is used.
        city: Option<String>,
    },

    /// List cities matching a partial name.
    Search {
        /// Partial city name.
        query: String,
    },

    /// Interactive screen: search, pick a city, see its forecast.
    Browse,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Show { city: Some(city) } => show_city(&city).await,
            Command::Show { city: None } => show_remembered().await,
            Command::Search { query } => search(&query).await,
            Command::Browse => browse().await,
        }
    }
}

fn configure() -> Result<()> {
    let mut config = Config::load()?;

    let api_key = Password::new("WeatherAPI.com API key:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .with_help_message("Get one at https://www.weatherapi.com/")
        .prompt()
        .context("Failed to read API key")?;

    let default_city = Text::new("Default city:")
        .with_default(&config.screen.default_city)
        .prompt()
        .context("Failed to read default city")?;

    config.set_api_key(api_key.trim().to_string());
    if !default_city.trim().is_empty() {
        config.screen.default_city = default_city.trim().to_string();
    }
    config.save()?;

    println!("Configuration saved to {}", Config::config_file_path()?.display());
    Ok(())
}

async fn show_city(city: &str) -> Result<()> {
    let config = Config::load()?;
    let provider = provider_from_config(&config)?;

    let fetch = provider.fetch_forecast(city, config.screen.forecast_days);
    let snapshot = tokio::time::timeout(config.screen.request_timeout(), fetch)
        .await
        .with_context(|| format!("Forecast for '{city}' timed out"))??;

    print!("{}", render::snapshot(&snapshot));
    Ok(())
}

async fn show_remembered() -> Result<()> {
    let (screen, task) = mount(&Config::load()?)?;

    let state = screen.wait_for(ScreenState::is_settled).await?;
    print!("{}", render::screen(&state));

    drop(screen);
    task.await.context("Screen controller panicked")?;
    Ok(())
}

async fn search(query: &str) -> Result<()> {
    let config = Config::load()?;
    let provider = provider_from_config(&config)?;

    let lookup = provider.search_locations(query);
    let found = tokio::time::timeout(config.screen.request_timeout(), lookup)
        .await
        .with_context(|| format!("Search for '{query}' timed out"))??;

    if found.is_empty() {
        println!("No matching cities.");
    } else {
        print!("{}", render::candidates(&found));
    }
    Ok(())
}

async fn browse() -> Result<()> {
    let config = Config::load()?;
    let min_chars = config.screen.min_query_chars;
    let (screen, task) = mount(&config)?;

    let state = screen.wait_for(ScreenState::is_settled).await?;
    print!("{}", render::screen(&state));

    while let Some(query) = prompt(move || {
        Text::new("Search city:")
            .with_help_message(&format!("at least {min_chars} letters, Esc to quit"))
            .prompt()
    })
    .await?
    {
        let before = screen.state().searches_settled();
        screen.input(query)?;
        let state = screen.wait_for(|s| s.searches_settled() > before).await?;

        if let Some(err) = &state.last_search_error {
            println!("Search failed: {err}");
            continue;
        }
        if state.candidates.is_empty() {
            println!("No matching cities.");
            continue;
        }

        let options = state.candidates.clone();
        let Some(choice) = prompt(move || Select::new("Pick a city:", options).prompt()).await?
        else {
            continue;
        };

        select_and_show(&screen, choice).await?;
    }

    drop(screen);
    task.await.context("Screen controller panicked")?;
    Ok(())
}

async fn select_and_show(screen: &ScreenHandle, choice: CandidateLocation) -> Result<()> {
    let before = screen.state().forecasts_settled();
    screen.select(choice)?;
    let mut state = screen.wait_for(|s| s.forecasts_settled() > before).await?;
    print!("{}", render::screen(&state));

    while let Some(err) = state.error() {
        let question = format!("Retry {}?", err.city());
        let retry = prompt(move || Confirm::new(&question).with_default(true).prompt()).await?;
        if retry != Some(true) {
            break;
        }

        let before = state.forecasts_settled();
        screen.retry()?;
        state = screen.wait_for(|s| s.forecasts_settled() > before).await?;
        print!("{}", render::screen(&state));
    }

    Ok(())
}

fn mount(config: &Config) -> Result<(ScreenHandle, tokio::task::JoinHandle<()>)> {
    let provider = provider_from_config(config)?;
    let store = Arc::new(FileStore::new(config.store_file_path()?));
    tracing::debug!(store = %store.path().display(), "mounting screen");

    Ok(ScreenController::new(provider, store, config.screen.clone()).spawn())
}

/// Runs a blocking inquire prompt off the async workers. Esc / Ctrl-C yield `None`.
async fn prompt<T, F>(ask: F) -> Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, InquireError> + Send + 'static,
{
    match tokio::task::spawn_blocking(ask).await? {
        Ok(answer) => Ok(Some(answer)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(err) => Err(err).context("Prompt failed"),
    }
}
