//! Core library for the `cityweather` screen.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The weather provider abstraction (city search + forecast) and its WeatherAPI.com client
//! - Persistence of the last selected city
//! - The screen state machine and the async controller that drives it
//!
//! It is used by `cityweather-cli`, but can also back other front-ends.

pub mod config;
pub mod controller;
pub mod debounce;
pub mod error;
pub mod model;
pub mod provider;
pub mod screen;
pub mod store;

pub use config::{Config, ProviderConfig, ScreenSettings};
pub use controller::{Command, ScreenController, ScreenHandle};
pub use error::{ControllerClosed, ScreenError};
pub use model::{CandidateLocation, WeatherSnapshot};
pub use provider::{WeatherProvider, provider_from_config};
pub use screen::{Phase, ScreenState};
pub use store::{FileStore, KeyValueStore, MemoryStore};
