//! Async runtime for the screen.
//!
//! One task owns the [`ScreenState`]. It multiplexes user commands, completions
//! from spawned provider calls and the search debounce deadline, applies each as
//! an [`Event`], runs the returned effects, and publishes the new state.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::ScreenSettings,
    debounce::{Debouncer, wait_until},
    error::{ControllerClosed, ScreenError},
    model::CandidateLocation,
    provider::WeatherProvider,
    screen::{Effect, Event, ScreenState},
    store::{CITY_KEY, KeyValueStore},
};

/// Input from the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Input(String),
    Select(CandidateLocation),
    ToggleSearch,
    Retry,
}

/// Cheap, cloneable access to a running screen.
#[derive(Debug, Clone)]
pub struct ScreenHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ScreenState>,
}

impl ScreenHandle {
    pub fn input(&self, text: impl Into<String>) -> Result<(), ControllerClosed> {
        self.send(Command::Input(text.into()))
    }

    pub fn select(&self, candidate: CandidateLocation) -> Result<(), ControllerClosed> {
        self.send(Command::Select(candidate))
    }

    pub fn toggle_search(&self) -> Result<(), ControllerClosed> {
        self.send(Command::ToggleSearch)
    }

    pub fn retry(&self) -> Result<(), ControllerClosed> {
        self.send(Command::Retry)
    }

    fn send(&self, command: Command) -> Result<(), ControllerClosed> {
        self.commands.send(command).map_err(|_| ControllerClosed)
    }

    /// Latest published state.
    pub fn state(&self) -> ScreenState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScreenState> {
        self.state.clone()
    }

    /// Waits until the published state satisfies `pred`, checking the current state first.
    pub async fn wait_for(
        &self,
        pred: impl FnMut(&ScreenState) -> bool,
    ) -> Result<ScreenState, ControllerClosed> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(pred).await.map_err(|_| ControllerClosed)?;
        Ok(state.clone())
    }
}

#[derive(Debug)]
pub struct ScreenController {
    provider: Arc<dyn WeatherProvider>,
    store: Arc<dyn KeyValueStore>,
    settings: ScreenSettings,
}

impl ScreenController {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        store: Arc<dyn KeyValueStore>,
        settings: ScreenSettings,
    ) -> Self {
        Self { provider, store, settings }
    }

    /// Mounts the screen: starts the controller task and the startup load.
    ///
    /// The task stops once every handle has been dropped.
    pub fn spawn(self) -> (ScreenHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ScreenState::new(self.settings.clone()));

        let task = tokio::spawn(self.run(commands_rx, state_tx));

        (ScreenHandle { commands: commands_tx, state: state_rx }, task)
    }

    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ScreenState>,
    ) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
        let mut state = ScreenState::new(self.settings.clone());
        let mut debouncer = Debouncer::new(self.settings.search_debounce());

        self.spawn_startup(events_tx.clone());

        loop {
            let deadline = debouncer.deadline();

            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Input(text)) => {
                        debouncer.push(text.clone(), Instant::now());
                        Event::QueryChanged(text)
                    }
                    Some(Command::Select(candidate)) => {
                        debouncer.cancel();
                        Event::CandidateSelected(candidate)
                    }
                    Some(Command::ToggleSearch) => Event::SearchToggled,
                    Some(Command::Retry) => Event::RetryRequested,
                    None => break,
                },
                Some(event) = events_rx.recv() => event,
                () = wait_until(deadline) => match debouncer.take_due(Instant::now()) {
                    Some(query) => Event::QueryDebounced(query),
                    None => continue,
                },
            };

            for effect in state.apply(event) {
                self.execute(effect, &events_tx).await;
            }

            state_tx.send_replace(state.clone());
        }

        debug!("screen controller stopped");
    }

    fn spawn_startup(&self, events: mpsc::UnboundedSender<Event>) {
        let store = Arc::clone(&self.store);
        let default_city = self.settings.default_city.clone();

        tokio::spawn(async move {
            let city = resolve_startup_city(store, default_city).await;
            let _ = events.send(Event::StartupCityResolved(city));
        });
    }

    async fn execute(&self, effect: Effect, events: &mpsc::UnboundedSender<Event>) {
        match effect {
            Effect::Search { request, query } => {
                let provider = Arc::clone(&self.provider);
                let timeout = self.settings.request_timeout();
                let events = events.clone();

                debug!(request, %query, "searching locations");
                tokio::spawn(async move {
                    let search = provider.search_locations(&query);
                    let result = match tokio::time::timeout(timeout, search).await {
                        Ok(Ok(candidates)) => Ok(candidates),
                        Ok(Err(err)) => Err(format!("{err:#}")),
                        Err(_) => Err(format!(
                            "Search for '{query}' timed out after {}s",
                            timeout.as_secs()
                        )),
                    };
                    if let Err(message) = &result {
                        warn!(request, %query, error = %message, "location search failed");
                    }
                    let _ = events.send(Event::SearchCompleted { request, result });
                });
            }
            Effect::FetchForecast { request, city, days } => {
                let provider = Arc::clone(&self.provider);
                let timeout = self.settings.request_timeout();
                let events = events.clone();

                debug!(request, %city, days, "fetching forecast");
                tokio::spawn(async move {
                    let fetch = provider.fetch_forecast(&city, days);
                    let result = match tokio::time::timeout(timeout, fetch).await {
                        Ok(Ok(snapshot)) => {
                            info!(request, %city, "forecast loaded");
                            Ok(snapshot)
                        }
                        Ok(Err(err)) => Err(ScreenError::ForecastFailed {
                            city: city.clone(),
                            message: format!("{err:#}"),
                        }),
                        Err(_) => Err(ScreenError::ForecastTimeout { city: city.clone(), after: timeout }),
                    };
                    if let Err(err) = &result {
                        warn!(request, error = %err, "forecast request failed");
                    }
                    let _ = events.send(Event::ForecastCompleted { request, result });
                });
            }
            Effect::PersistCity(city) => {
                // awaited in place so successive selections are written in order
                let store = Arc::clone(&self.store);
                let value = city.clone();
                match tokio::task::spawn_blocking(move || store.set(CITY_KEY, &value)).await {
                    Ok(Ok(())) => debug!(%city, "persisted city"),
                    Ok(Err(err)) => warn!(%city, error = %err, "failed to persist city"),
                    Err(err) => warn!(%city, error = %err, "persist task panicked"),
                }
            }
        }
    }
}

/// Persisted city, or the default when it is absent, blank or unreadable.
pub async fn resolve_startup_city(store: Arc<dyn KeyValueStore>, default_city: String) -> String {
    match tokio::task::spawn_blocking(move || store.get(CITY_KEY)).await {
        Ok(Ok(Some(city))) if !city.trim().is_empty() => city,
        Ok(Ok(_)) => default_city,
        Ok(Err(err)) => {
            warn!(error = %err, %default_city, "failed to read persisted city, using default");
            default_city
        }
        Err(err) => {
            warn!(error = %err, %default_city, "store read task panicked, using default");
            default_city
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::WeatherSnapshot,
        screen::{
            Phase,
            tests::{london, snapshot},
        },
        store::{MemoryStore, StoreError},
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::{collections::HashMap, time::Duration};

    #[derive(Debug, Default)]
    struct ScriptedProvider {
        results: HashMap<String, Vec<CandidateLocation>>,
        search_delays: HashMap<String, Duration>,
        forecast_delay: Option<Duration>,
        forecast_failures: Mutex<u32>,
        searches: Mutex<Vec<(String, Instant)>>,
        forecasts: Mutex<Vec<(String, u8)>>,
    }

    impl ScriptedProvider {
        fn searched(&self) -> Vec<String> {
            self.searches.lock().iter().map(|(q, _)| q.clone()).collect()
        }

        fn forecasts(&self) -> Vec<(String, u8)> {
            self.forecasts.lock().clone()
        }
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn search_locations(&self, query: &str) -> anyhow::Result<Vec<CandidateLocation>> {
            self.searches.lock().push((query.to_string(), Instant::now()));
            if let Some(delay) = self.search_delays.get(query) {
                tokio::time::sleep(*delay).await;
            }
            Ok(self.results.get(query).cloned().unwrap_or_default())
        }

        async fn fetch_forecast(&self, city: &str, days: u8) -> anyhow::Result<WeatherSnapshot> {
            self.forecasts.lock().push((city.to_string(), days));
            if let Some(delay) = self.forecast_delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut failures = self.forecast_failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(anyhow!("No matching location found."));
                }
            }
            Ok(snapshot(city))
        }
    }

    #[derive(Debug)]
    struct BrokenStore;

    fn disk_error() -> StoreError {
        StoreError::Io {
            path: "/nonexistent/state.json".into(),
            source: std::io::Error::other("disk on fire"),
        }
    }

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(disk_error())
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(disk_error())
        }
    }

    fn mount(
        provider: &Arc<ScriptedProvider>,
        store: &Arc<MemoryStore>,
    ) -> (ScreenHandle, JoinHandle<()>) {
        let provider: Arc<dyn WeatherProvider> = provider.clone();
        let store: Arc<dyn KeyValueStore> = store.clone();
        ScreenController::new(provider, store, ScreenSettings::default()).spawn()
    }

    fn persisted(store: &MemoryStore) -> Option<String> {
        store.get(CITY_KEY).expect("memory store never fails")
    }

    #[tokio::test(start_paused = true)]
    async fn startup_without_persisted_city_uses_default() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);

        let state = screen.wait_for(ScreenState::is_settled).await.expect("running");

        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(provider.forecasts(), [("chennai".to_string(), 7)]);
        assert_eq!(state.weather.map(|w| w.location.name), Some("chennai".to_string()));
        // startup never writes the store
        assert_eq!(persisted(&store), None);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_uses_persisted_city() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::with_entry(CITY_KEY, "London"));
        let (screen, _task) = mount(&provider, &store);

        screen.wait_for(ScreenState::is_settled).await.expect("running");

        assert_eq!(provider.forecasts(), [("London".to_string(), 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_store_falls_back_to_default() {
        let provider = Arc::new(ScriptedProvider::default());
        let (screen, _task) = ScreenController::new(
            provider.clone(),
            Arc::new(BrokenStore),
            ScreenSettings::default(),
        )
        .spawn();

        let state = screen.wait_for(ScreenState::is_settled).await.expect("running");

        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(provider.forecasts(), [("chennai".to_string(), 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_input_never_searches() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        screen.input("L").expect("running");
        screen.input("Lo").expect("running");
        screen.wait_for(|s| s.searches_settled() == 1).await.expect("running");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(provider.searched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keystroke_burst_collapses_into_one_search() {
        let mut provider = ScriptedProvider::default();
        provider.results.insert("Lon".into(), vec![CandidateLocation::new("London", "", "UK")]);
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        let start = Instant::now();
        for text in ["L", "Lo", "Lon"] {
            screen.input(text).expect("running");
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let last_keystroke = start + Duration::from_millis(400);

        let state = screen.wait_for(|s| s.searches_settled() == 1).await.expect("running");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let searches = provider.searches.lock().clone();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].0, "Lon");
        assert!(searches[0].1 >= last_keystroke + Duration::from_millis(1200));
        assert_eq!(state.candidates, [CandidateLocation::new("London", "", "UK")]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_from_older_search_is_dropped() {
        let paris = vec![CandidateLocation::new("Paris", "Ile-de-France", "France")];
        let mut provider = ScriptedProvider::default();
        provider.results.insert("Lon".into(), vec![london()]);
        provider.results.insert("Paris".into(), paris.clone());
        provider.search_delays.insert("Lon".into(), Duration::from_secs(3));
        provider.search_delays.insert("Paris".into(), Duration::from_millis(100));
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        screen.input("Lon").expect("running");
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(provider.searched(), ["Lon"]);

        screen.input("Paris").expect("running");
        screen.wait_for(|s| s.candidates == paris).await.expect("running");

        // the "Lon" response lands after "Paris" and must not overwrite it
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.searched(), ["Lon", "Paris"]);
        assert_eq!(screen.state().candidates, paris);
    }

    #[tokio::test(start_paused = true)]
    async fn search_then_select_loads_and_persists() {
        let mut provider = ScriptedProvider::default();
        provider.results.insert("Lon".into(), vec![london()]);
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        let before = screen.wait_for(ScreenState::is_settled).await.expect("running");

        screen.input("Lon").expect("running");
        let state = screen.wait_for(|s| !s.candidates.is_empty()).await.expect("running");
        assert!(state.search_visible);

        screen.select(london()).expect("running");
        let state = screen
            .wait_for(|s| s.forecasts_settled() > before.forecasts_settled())
            .await
            .expect("running");

        assert_eq!(state.phase, Phase::Ready);
        assert!(!state.is_loading());
        assert!(!state.search_visible);
        assert!(state.candidates.is_empty());
        assert_eq!(state.weather.map(|w| w.location.name), Some("London".to_string()));
        assert_eq!(provider.forecasts().last(), Some(&("London".to_string(), 7)));
        assert_eq!(persisted(&store).as_deref(), Some("London"));
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_same_city_twice_is_idempotent() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        screen.select(london()).expect("running");
        let first = screen.wait_for(|s| s.forecasts_settled() == 2).await.expect("running");
        screen.select(london()).expect("running");
        let second = screen.wait_for(|s| s.forecasts_settled() == 3).await.expect("running");

        assert_eq!(first.weather, second.weather);
        assert_eq!(persisted(&store).as_deref(), Some("London"));
    }

    #[tokio::test(start_paused = true)]
    async fn selection_cancels_pending_debounce() {
        let mut provider = ScriptedProvider::default();
        provider.results.insert("Lon".into(), vec![london()]);
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        screen.input("Lon").expect("running");
        screen.select(london()).expect("running");
        screen.wait_for(|s| s.forecasts_settled() == 2).await.expect("running");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(provider.searched().is_empty());
        assert!(screen.state().candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_forecast_times_out_into_failed_phase() {
        let provider = Arc::new(ScriptedProvider {
            forecast_delay: Some(Duration::from_secs(600)),
            ..ScriptedProvider::default()
        });
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);

        let start = Instant::now();
        let state = screen.wait_for(ScreenState::is_settled).await.expect("running");

        assert!(!state.is_loading());
        assert_eq!(
            state.error(),
            Some(&ScreenError::ForecastTimeout {
                city: "chennai".into(),
                after: Duration::from_secs(15),
            })
        );
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_selection_can_be_retried() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        *provider.forecast_failures.lock() = 1;
        screen.select(london()).expect("running");
        let failed = screen.wait_for(|s| s.forecasts_settled() == 2).await.expect("running");

        assert!(matches!(failed.phase, Phase::Failed(ScreenError::ForecastFailed { .. })));
        assert_eq!(failed.weather.map(|w| w.location.name), Some("chennai".to_string()));
        assert_eq!(persisted(&store), None);

        screen.retry().expect("running");
        let state = screen.wait_for(|s| s.forecasts_settled() == 3).await.expect("running");

        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(persisted(&store).as_deref(), Some("London"));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_search_panel_toggle() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let (screen, _task) = mount(&provider, &store);
        let mut updates = screen.subscribe();
        screen.wait_for(ScreenState::is_settled).await.expect("running");

        screen.toggle_search().expect("running");
        let state = updates.wait_for(|s| s.search_visible).await.expect("running");

        assert!(state.candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_controller() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let (screen, task) = mount(&provider, &store);

        drop(screen);

        task.await.expect("controller exits cleanly");
    }
}
