//! Screen state and its transitions.
//!
//! `ScreenState::apply` is pure: it never touches the network or the store. It
//! returns the side effects the controller must run, and every network effect is
//! tagged with a request id so late responses can be recognised and dropped.

use tracing::debug;

use crate::{
    config::ScreenSettings,
    error::ScreenError,
    model::{CandidateLocation, WeatherSnapshot},
};

pub type RequestId = u64;

/// Why a forecast was requested. Only selections are remembered across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastOrigin {
    Startup,
    Selection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Mounted; the startup city has not been resolved yet.
    Initializing,
    Loading { city: String },
    Ready,
    Failed(ScreenError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Startup city read from the store (or the default). Accepted once.
    StartupCityResolved(String),
    /// Raw text from the search box, on every keystroke.
    QueryChanged(String),
    /// The search box has been quiet for the debounce period.
    QueryDebounced(String),
    SearchCompleted {
        request: RequestId,
        result: Result<Vec<CandidateLocation>, String>,
    },
    SearchToggled,
    CandidateSelected(CandidateLocation),
    ForecastCompleted {
        request: RequestId,
        result: Result<WeatherSnapshot, ScreenError>,
    },
    RetryRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Search { request: RequestId, query: String },
    FetchForecast { request: RequestId, city: String, days: u8 },
    PersistCity(String),
}

#[derive(Debug, Clone, PartialEq)]
struct ForecastRequest {
    id: RequestId,
    city: String,
    origin: ForecastOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenState {
    pub phase: Phase,
    pub query: String,
    pub debounced_query: Option<String>,
    pub candidates: Vec<CandidateLocation>,
    pub search_visible: bool,
    /// The one authoritative snapshot. Only replaced by a successful fetch.
    pub weather: Option<WeatherSnapshot>,
    pub last_search_error: Option<String>,

    settings: ScreenSettings,
    search_seq: RequestId,
    forecast_seq: RequestId,
    in_flight: Option<ForecastRequest>,
    failed: Option<ForecastRequest>,
    startup_done: bool,
    searches_settled: u64,
    forecasts_settled: u64,
}

impl ScreenState {
    pub fn new(settings: ScreenSettings) -> Self {
        Self {
            phase: Phase::Initializing,
            query: String::new(),
            debounced_query: None,
            candidates: Vec::new(),
            search_visible: false,
            weather: None,
            last_search_error: None,
            settings,
            search_seq: 0,
            forecast_seq: 0,
            in_flight: None,
            failed: None,
            startup_done: false,
            searches_settled: 0,
            forecasts_settled: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Initializing | Phase::Loading { .. })
    }

    /// A forecast request has resolved one way or the other.
    pub fn is_settled(&self) -> bool {
        matches!(self.phase, Phase::Ready | Phase::Failed(_))
    }

    pub fn error(&self) -> Option<&ScreenError> {
        match &self.phase {
            Phase::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Counts debounce cycles that reached an outcome: applied results, a
    /// failure, or a query too short to search.
    pub fn searches_settled(&self) -> u64 {
        self.searches_settled
    }

    /// Counts forecast requests that reached an outcome (success or failure).
    pub fn forecasts_settled(&self) -> u64 {
        self.forecasts_settled
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::StartupCityResolved(city) => self.on_startup(city),
            Event::QueryChanged(text) => {
                self.query = text;
                self.search_visible = true;
                Vec::new()
            }
            Event::QueryDebounced(text) => self.on_query_debounced(text),
            Event::SearchCompleted { request, result } => {
                self.on_search_completed(request, result);
                Vec::new()
            }
            Event::SearchToggled => {
                self.search_visible = !self.search_visible;
                Vec::new()
            }
            Event::CandidateSelected(candidate) => self.on_selected(candidate),
            Event::ForecastCompleted { request, result } => self.on_forecast_completed(request, result),
            Event::RetryRequested => self.on_retry(),
        }
    }

    fn on_startup(&mut self, city: String) -> Vec<Effect> {
        if self.startup_done {
            debug!(%city, "ignoring repeated startup");
            return Vec::new();
        }
        self.startup_done = true;

        // a selection made before the store answered takes precedence
        if self.in_flight.is_some() || !matches!(self.phase, Phase::Initializing) {
            debug!(%city, "startup superseded by selection");
            return Vec::new();
        }

        vec![self.issue_forecast(city, ForecastOrigin::Startup)]
    }

    fn on_query_debounced(&mut self, text: String) -> Vec<Effect> {
        self.debounced_query = Some(text.clone());

        if !self.settings.is_searchable(&text) {
            // outstanding searches belong to a query the user has moved past
            self.search_seq += 1;
            self.candidates.clear();
            self.last_search_error = None;
            self.searches_settled += 1;
            return Vec::new();
        }

        self.search_seq += 1;
        vec![Effect::Search { request: self.search_seq, query: text }]
    }

    fn on_search_completed(
        &mut self,
        request: RequestId,
        result: Result<Vec<CandidateLocation>, String>,
    ) {
        if request != self.search_seq {
            debug!(request, latest = self.search_seq, "dropping stale search response");
            return;
        }

        match result {
            Ok(candidates) => {
                self.candidates = candidates;
                self.last_search_error = None;
            }
            Err(message) => {
                self.last_search_error = Some(message);
            }
        }
        self.searches_settled += 1;
    }

    fn on_selected(&mut self, candidate: CandidateLocation) -> Vec<Effect> {
        self.search_visible = false;
        self.candidates.clear();
        self.query.clear();
        self.debounced_query = None;
        self.last_search_error = None;
        self.search_seq += 1;

        vec![self.issue_forecast(candidate.name, ForecastOrigin::Selection)]
    }

    fn on_forecast_completed(
        &mut self,
        request: RequestId,
        result: Result<WeatherSnapshot, ScreenError>,
    ) -> Vec<Effect> {
        let Some(in_flight) = self.in_flight.take_if(|r| r.id == request) else {
            debug!(request, latest = self.forecast_seq, "dropping stale forecast response");
            return Vec::new();
        };
        self.forecasts_settled += 1;

        match result {
            Ok(snapshot) => {
                self.weather = Some(snapshot);
                self.phase = Phase::Ready;
                self.failed = None;
                match in_flight.origin {
                    ForecastOrigin::Selection => vec![Effect::PersistCity(in_flight.city)],
                    ForecastOrigin::Startup => Vec::new(),
                }
            }
            Err(err) => {
                self.phase = Phase::Failed(err);
                self.failed = Some(in_flight);
                Vec::new()
            }
        }
    }

    fn on_retry(&mut self) -> Vec<Effect> {
        match self.failed.take() {
            Some(failed) if matches!(self.phase, Phase::Failed(_)) => {
                vec![self.issue_forecast(failed.city, failed.origin)]
            }
            other => {
                self.failed = other;
                Vec::new()
            }
        }
    }

    fn issue_forecast(&mut self, city: String, origin: ForecastOrigin) -> Effect {
        self.forecast_seq += 1;
        self.phase = Phase::Loading { city: city.clone() };
        self.failed = None;
        self.in_flight = Some(ForecastRequest { id: self.forecast_seq, city: city.clone(), origin });

        Effect::FetchForecast {
            request: self.forecast_seq,
            city,
            days: self.settings.forecast_days,
        }
    }
}
