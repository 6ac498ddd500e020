//! Restart bookkeeping.
//!
//! A component may be restarted at most `max_restarts` times within a
//! sliding `window`. Once the bound is hit the component is considered
//! crashed and is not restarted again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One restart performed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartEvent {
    pub component: String,
    pub timestamp: DateTime<Utc>,
    /// Time since the last sign of life.
    pub downtime_secs: i64,
    /// Restarts within the current window, this one included.
    pub restarts_in_window: usize,
    pub launched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sliding-window restart history for one component.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    max_restarts: u32,
    window: Duration,
    history: Vec<DateTime<Utc>>,
}

impl RestartTracker {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            history: Vec::new(),
        }
    }

    /// Restarts within the window ending at `now`.
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        let window_start = now - self.window;
        self.history.iter().filter(|t| **t >= window_start).count()
    }

    /// Whether another restart is allowed at `now`.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        self.count(now) < self.max_restarts as usize
    }

    /// Record a restart at `now`, returning the count within the window.
    pub fn record(&mut self, now: DateTime<Utc>) -> usize {
        self.history.push(now);
        let window_start = now - self.window;
        self.history.retain(|t| *t >= window_start);
        self.history.len()
    }

    pub fn last_restart(&self) -> Option<DateTime<Utc>> {
        self.history.last().copied()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
