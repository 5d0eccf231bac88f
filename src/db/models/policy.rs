//! Notification policy data model.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::StressLevel;

/// Lowest level that may trigger an alert for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertThreshold {
    High,
    Severe,
}

impl AlertThreshold {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertThreshold::High => "high",
            AlertThreshold::Severe => "severe",
        }
    }

    /// Severe meets either threshold; high only meets `High`.
    pub fn admits(&self, level: StressLevel) -> bool {
        match self {
            AlertThreshold::High => level.is_elevated(),
            AlertThreshold::Severe => level == StressLevel::Severe,
        }
    }
}

impl fmt::Display for AlertThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AlertThreshold {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "high" => Ok(AlertThreshold::High),
            "severe" => Ok(AlertThreshold::Severe),
            other => Err(anyhow!("unknown alert threshold '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPolicy {
    pub id: String,
    pub subject_id: String,
    pub enabled: bool,
    pub level_threshold: AlertThreshold,
    pub consecutive_count_threshold: u32,
    pub last_sent: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Administrative settings for creating or replacing a subject's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInput {
    pub enabled: bool,
    pub level_threshold: AlertThreshold,
    pub consecutive_count_threshold: u32,
}

impl Default for PolicyInput {
    fn default() -> Self {
        Self {
            enabled: true,
            level_threshold: AlertThreshold::High,
            consecutive_count_threshold: 3,
        }
    }
}
