use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};

use crate::model::{
    CandidateLocation, Condition, CurrentConditions, DaySummary, Forecast, ForecastDay,
    SnapshotLocation, WeatherSnapshot,
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{endpoint}", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to WeatherAPI.com ({endpoint})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read WeatherAPI {endpoint} response body"))?;

        if !status.is_success() {
            return Err(anyhow!(
                "WeatherAPI {endpoint} request failed with status {}: {}",
                status,
                error_message(&body),
            ));
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse WeatherAPI {endpoint} JSON"))
    }
}

#[derive(Debug, Deserialize)]
struct WaSearchHit {
    id: Option<u64>,
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
    localtime_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
    #[serde(default)]
    icon: String,
    code: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    condition: WaCondition,
    feelslike_c: Option<f64>,
    humidity: Option<u8>,
    wind_kph: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    avgtemp_c: f64,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
}

#[derive(Debug, Deserialize, Default)]
struct WaForecast {
    #[serde(default)]
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    current: WaCurrent,
    #[serde(default)]
    forecast: WaForecast,
}

#[derive(Debug, Deserialize)]
struct WaErrorEnvelope {
    error: WaError,
}

#[derive(Debug, Deserialize)]
struct WaError {
    message: String,
}

impl From<WaCondition> for Condition {
    fn from(c: WaCondition) -> Self {
        Condition { text: c.text, icon: c.icon, code: c.code }
    }
}

impl From<WaSearchHit> for CandidateLocation {
    fn from(hit: WaSearchHit) -> Self {
        CandidateLocation {
            id: hit.id,
            name: hit.name,
            region: hit.region,
            country: hit.country,
            lat: hit.lat,
            lon: hit.lon,
        }
    }
}

impl From<WaForecastResponse> for WeatherSnapshot {
    fn from(parsed: WaForecastResponse) -> Self {
        WeatherSnapshot {
            location: SnapshotLocation {
                name: parsed.location.name,
                region: parsed.location.region,
                country: parsed.location.country,
                localtime: parsed.location.localtime_epoch.and_then(unix_to_utc),
            },
            current: CurrentConditions {
                temp_c: parsed.current.temp_c,
                condition: parsed.current.condition.into(),
                feelslike_c: parsed.current.feelslike_c,
                humidity: parsed.current.humidity,
                wind_kph: parsed.current.wind_kph,
            },
            forecast: Forecast {
                forecastday: parsed
                    .forecast
                    .forecastday
                    .into_iter()
                    .map(|fd| ForecastDay {
                        date: fd.date,
                        day: DaySummary {
                            maxtemp_c: fd.day.maxtemp_c,
                            mintemp_c: fd.day.mintemp_c,
                            avgtemp_c: fd.day.avgtemp_c,
                            condition: fd.day.condition.into(),
                        },
                    })
                    .collect(),
            },
        }
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    async fn search_locations(&self, query: &str) -> Result<Vec<CandidateLocation>> {
        let hits: Vec<WaSearchHit> = self.get_json("search.json", &[("q", query)]).await?;
        Ok(hits.into_iter().map(CandidateLocation::from).collect())
    }

    async fn fetch_forecast(&self, city: &str, days: u8) -> Result<WeatherSnapshot> {
        let days = days.to_string();
        let parsed: WaForecastResponse = self
            .get_json(
                "forecast.json",
                &[("q", city), ("days", days.as_str()), ("aqi", "no"), ("alerts", "no")],
            )
            .await?;

        Ok(parsed.into())
    }
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

/// WeatherAPI reports failures as `{"error": {"code": .., "message": ..}}`.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<WaErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => truncate_body(body),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}
