use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-day aggregate of a subject's readings (UTC days).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub avg_score: f64,
    pub max_score: u8,
    pub reading_count: u32,
}
