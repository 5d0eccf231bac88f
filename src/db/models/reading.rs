//! Stress reading data model.
//!
//! One row per completed detection. Readings are append-only: a correction is
//! a new reading, never an update.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::{classify, ScoreOutput, StressLevel};
use crate::error::Result;

/// Where the image behind a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Image,
    Video,
    Realtime,
}

impl ReadingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingSource::Image => "image",
            ReadingSource::Video => "video",
            ReadingSource::Realtime => "realtime",
        }
    }
}

impl fmt::Display for ReadingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ReadingSource {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "image" => Ok(ReadingSource::Image),
            "video" => Ok(ReadingSource::Video),
            "realtime" => Ok(ReadingSource::Realtime),
            other => Err(anyhow!("unknown reading source '{other}'")),
        }
    }
}

/// Fields are read-only so the level can never drift from the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    id: String,
    subject_id: String,
    timestamp: DateTime<Utc>,
    score: u8,
    level: StressLevel,
    confidence: f64,
    source: ReadingSource,
    notes: Option<String>,
    is_fallback: bool,
}

impl Reading {
    /// Build a reading from engine output. The level is always derived from
    /// the score here, never supplied by the caller.
    pub fn new(
        subject_id: impl Into<String>,
        source: ReadingSource,
        notes: Option<String>,
        output: &ScoreOutput,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        Self::restore(
            Uuid::new_v4().to_string(),
            subject_id.into(),
            timestamp,
            output,
            source,
            notes.filter(|n| !n.trim().is_empty()),
        )
    }

    /// Rebuild a stored reading; the level is recomputed from the score.
    pub(crate) fn restore(
        id: String,
        subject_id: String,
        timestamp: DateTime<Utc>,
        output: &ScoreOutput,
        source: ReadingSource,
        notes: Option<String>,
    ) -> Result<Self> {
        let (level, _) = classify(i32::from(output.score))?;
        Ok(Self {
            id,
            subject_id,
            timestamp,
            score: output.score,
            level,
            confidence: output.confidence,
            source,
            notes,
            is_fallback: output.is_fallback,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn level(&self) -> StressLevel {
        self.level
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source(&self) -> ReadingSource {
        self.source
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }
}
