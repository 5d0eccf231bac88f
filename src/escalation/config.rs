use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Trailing window in which elevated readings are counted.
    pub window_hours: u32,
    /// Minimum gap after `last_sent` before another alert may fire. `None`
    /// keeps the monitor purely level-triggered.
    pub cooldown_minutes: Option<u32>,
    /// Upper bound on one escalation check against storage.
    pub timeout_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            cooldown_minutes: None,
            timeout_ms: 5_000,
        }
    }
}

impl EscalationConfig {
    pub fn window(&self) -> Duration {
        Duration::hours(i64::from(self.window_hours))
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_minutes
            .map(|minutes| Duration::minutes(i64::from(minutes)))
    }

    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.timeout_ms)
    }
}
