//! Trailing-edge debounce: coalesce bursts of values into one after a quiet period.

use tokio::time::{Duration, Instant};

#[derive(Debug)]
struct Pending<T> {
    deadline: Instant,
    value: T,
}

/// Holds at most one pending value. Each `push` replaces the value and restarts the window.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some(Pending { deadline: now + self.delay, value });
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Yields the latest value once its quiet period has elapsed, exactly once.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some(p) if p.deadline <= now => self.pending.take().map(|p| p.value),
            _ => None,
        }
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.value)
    }
}

/// Resolves at the deadline, or never when nothing is pending.
pub async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
