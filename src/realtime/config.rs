use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub interval_secs: u64,
    pub capture_timeout_secs: u64,
    /// Frames whose perceptual hash differs from the last scored frame by
    /// fewer bits than this are skipped.
    pub duplicate_distance: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            capture_timeout_secs: 10,
            duplicate_distance: 8,
        }
    }
}

impl RealtimeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs.max(1))
    }
}
