use std::time::Duration;

/// Failures the screen shows to the user instead of spinning forever.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScreenError {
    #[error("Forecast for '{city}' failed: {message}")]
    ForecastFailed { city: String, message: String },

    #[error("Forecast for '{city}' timed out after {}s", .after.as_secs())]
    ForecastTimeout { city: String, after: Duration },
}

impl ScreenError {
    pub fn city(&self) -> &str {
        match self {
            ScreenError::ForecastFailed { city, .. } | ScreenError::ForecastTimeout { city, .. } => {
                city
            }
        }
    }
}

/// Returned by a screen handle once its controller task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("screen controller has shut down")]
pub struct ControllerClosed;
