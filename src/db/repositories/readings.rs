use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_level, parse_source, to_i64, to_score, to_u32},
    models::{DailyTrend, Reading},
};
use crate::detection::ScoreOutput;

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
pub const DEFAULT_TREND_DAYS: u32 = 7;

const READING_COLUMNS: &str =
    "id, subject_id, timestamp, score, level, confidence, source, notes, is_fallback";

fn row_to_reading(row: &Row) -> Result<Reading> {
    let timestamp: String = row.get("timestamp")?;
    let level: String = row.get("level")?;
    let source: String = row.get("source")?;
    let output = ScoreOutput {
        score: to_score(row.get("score")?)?,
        confidence: row.get("confidence")?,
        is_fallback: row.get("is_fallback")?,
    };

    let reading = Reading::restore(
        row.get("id")?,
        row.get("subject_id")?,
        parse_datetime(&timestamp, "timestamp")?,
        &output,
        parse_source(&source)?,
        row.get("notes")?,
    )?;

    let stored_level = parse_level(&level)?;
    if stored_level != reading.level() {
        bail!(
            "reading {} stores level {stored_level} for score {}",
            reading.id(),
            reading.score()
        );
    }
    Ok(reading)
}

impl Database {
    /// Append a reading and return its id.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<String> {
        let record = reading.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO stress_readings (id, subject_id, timestamp, score, level, confidence, source, notes, is_fallback)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id(),
                    record.subject_id(),
                    format_datetime(&record.timestamp()),
                    record.score(),
                    record.level().as_str(),
                    record.confidence(),
                    record.source().as_str(),
                    record.notes(),
                    record.is_fallback(),
                ],
            )
            .with_context(|| "failed to insert stress reading")?;
            Ok(record.id().to_string())
        })
        .await
    }

    pub async fn get_reading(&self, reading_id: &str) -> Result<Option<Reading>> {
        let reading_id = reading_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {READING_COLUMNS} FROM stress_readings WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![reading_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_reading(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Readings for `subject_id` with `timestamp >= since`, newest first.
    pub async fn recent_readings(
        &self,
        subject_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {READING_COLUMNS} FROM stress_readings
                 WHERE subject_id = ?1 AND timestamp >= ?2
                 ORDER BY timestamp DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![subject_id, format_datetime(&since)])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }
            Ok(readings)
        })
        .await
    }

    /// Most recent readings for a subject, newest first.
    pub async fn list_readings(&self, subject_id: &str, limit: u32) -> Result<Vec<Reading>> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {READING_COLUMNS} FROM stress_readings
                 WHERE subject_id = ?1
                 ORDER BY timestamp DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![subject_id, to_i64(u64::from(limit))?])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }
            Ok(readings)
        })
        .await
    }

    /// Per-day aggregates from midnight UTC `days` days before `now` through
    /// the day of `now`, oldest first. That is `days + 1` calendar days, so
    /// `days = 0` covers today only. Days without readings are omitted.
    pub async fn daily_trend(
        &self,
        subject_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyTrend>> {
        let subject_id = subject_id.to_string();
        let first_day = now.date_naive() - Duration::days(i64::from(days));
        let since = first_day
            .and_hms_opt(0, 0, 0)
            .map(|midnight| Utc.from_utc_datetime(&midnight))
            .unwrap_or(now);

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(timestamp, 1, 10) AS day,
                        AVG(score) AS avg_score,
                        MAX(score) AS max_score,
                        COUNT(*) AS reading_count
                 FROM stress_readings
                 WHERE subject_id = ?1 AND timestamp >= ?2
                 GROUP BY day
                 ORDER BY day ASC",
            )?;
            let mut rows = stmt.query(params![subject_id, format_datetime(&since)])?;
            let mut trend = Vec::new();
            while let Some(row) = rows.next()? {
                let day: String = row.get("day")?;
                trend.push(DailyTrend {
                    date: NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                        .with_context(|| format!("failed to parse trend day '{day}'"))?,
                    avg_score: row.get("avg_score")?,
                    max_score: to_score(row.get("max_score")?)?,
                    reading_count: to_u32(row.get("reading_count")?, "reading_count")?,
                });
            }
            Ok(trend)
        })
        .await
    }
}
