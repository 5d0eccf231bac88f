use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{DetectionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressLevel {
    Low,
    Medium,
    High,
    Severe,
}

impl StressLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StressLevel::Low => "low",
            StressLevel::Medium => "medium",
            StressLevel::High => "high",
            StressLevel::Severe => "severe",
        }
    }

    /// High and severe readings are the ones counted towards escalation.
    pub fn is_elevated(&self) -> bool {
        matches!(self, StressLevel::High | StressLevel::Severe)
    }

    pub fn analysis(&self) -> Analysis {
        match self {
            StressLevel::Low => Analysis {
                summary: "Low stress: readings are within the normal range",
                recommendation: "Keep up current habits and take regular breaks.",
            },
            StressLevel::Medium => Analysis {
                summary: "Medium stress: readings are moderately elevated",
                recommendation: "Take a short break every hour and try a few minutes of deep breathing.",
            },
            StressLevel::High => Analysis {
                summary: "High stress: readings are well above normal",
                recommendation: "Step away for a longer break, such as a short walk or a meditation session.",
            },
            StressLevel::Severe => Analysis {
                summary: "Severe stress: readings are at a critical level",
                recommendation:
                    "Stop and take a break now, and talk to a colleague or supervisor.",
            },
        }
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StressLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "low" => Ok(StressLevel::Low),
            "medium" => Ok(StressLevel::Medium),
            "high" => Ok(StressLevel::High),
            "severe" => Ok(StressLevel::Severe),
            other => Err(anyhow!("unknown stress level '{other}'")),
        }
    }
}

/// Human-readable interpretation attached to each level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub summary: &'static str,
    pub recommendation: &'static str,
}

/// Map a score to its level: [0,25) low, [25,50) medium, [50,75) high, [75,100] severe.
///
/// Scores must already be clamped to 0..=100; anything else is a contract violation.
pub fn classify(score: i32) -> Result<(StressLevel, Analysis)> {
    let level = match score {
        0..=24 => StressLevel::Low,
        25..=49 => StressLevel::Medium,
        50..=74 => StressLevel::High,
        75..=100 => StressLevel::Severe,
        _ => return Err(DetectionError::InvalidScore(score)),
    };
    Ok((level, level.analysis()))
}
