//! Escalation alert data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::StressLevel;

pub const HIGH_STRESS_ALERT_TITLE: &str = "High Stress Alert";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub subject_id: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn high_stress(
        subject_id: impl Into<String>,
        level: StressLevel,
        score: u8,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            title: HIGH_STRESS_ALERT_TITLE.to_string(),
            message: format!(
                "Stress was detected at {} ({}/100). Consider taking a break or talking to someone you trust.",
                level.as_str().to_uppercase(),
                score
            ),
            created_at,
        }
    }
}
