use anyhow::{bail, Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, to_i64},
    models::Alert,
};

fn row_to_alert(row: &Row) -> Result<Alert> {
    let created_at: String = row.get("created_at")?;

    Ok(Alert {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        title: row.get("title")?,
        message: row.get("message")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    /// Insert the alert and stamp the policy's `last_sent` in one transaction.
    pub async fn record_alert(&self, alert: &Alert, policy_id: &str) -> Result<()> {
        let record = alert.clone();
        let policy_id = policy_id.to_string();
        self.execute(move |conn| {
            let sent_at = format_datetime(&record.created_at);
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO alerts (id, subject_id, title, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.subject_id,
                    record.title,
                    record.message,
                    sent_at,
                ],
            )
            .with_context(|| "failed to insert alert")?;

            let updated = tx
                .execute(
                    "UPDATE notification_policies
                     SET last_sent = ?1,
                         updated_at = ?1
                     WHERE id = ?2",
                    params![sent_at, policy_id],
                )
                .with_context(|| "failed to mark notification policy sent")?;
            if updated == 0 {
                bail!("notification policy {policy_id} not found");
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Newest first.
    pub async fn list_alerts(&self, subject_id: &str, limit: u32) -> Result<Vec<Alert>> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, subject_id, title, message, created_at
                 FROM alerts
                 WHERE subject_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![subject_id, to_i64(u64::from(limit))?])?;
            let mut alerts = Vec::new();
            while let Some(row) = rows.next()? {
                alerts.push(row_to_alert(row)?);
            }
            Ok(alerts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{PolicyInput, HIGH_STRESS_ALERT_TITLE};
    use crate::detection::StressLevel;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn alerts_are_listed_newest_first_per_subject() {
        let db = Database::open_in_memory().unwrap();
        let s1 = db.upsert_policy("s1", PolicyInput::default()).await.unwrap();
        let s2 = db.upsert_policy("s2", PolicyInput::default()).await.unwrap();
        let base = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();

        let first = Alert::high_stress("s1", StressLevel::High, 60, base);
        let second = Alert::high_stress("s1", StressLevel::Severe, 91, base + Duration::hours(1));
        let other = Alert::high_stress("s2", StressLevel::High, 55, base);
        db.record_alert(&first, &s1.id).await.unwrap();
        db.record_alert(&second, &s1.id).await.unwrap();
        db.record_alert(&other, &s2.id).await.unwrap();

        let listed = db.list_alerts("s1", 10).await.unwrap();
        assert_eq!(listed, vec![second.clone(), first]);
        assert_eq!(listed[0].title, HIGH_STRESS_ALERT_TITLE);
        assert!(listed[0].message.contains("SEVERE"));
        assert!(listed[0].message.contains("91"));

        let policy = db.get_policy("s1").await.unwrap().unwrap();
        assert_eq!(policy.last_sent, Some(second.created_at));
    }

    #[tokio::test]
    async fn unknown_policy_rolls_back_the_alert() {
        let db = Database::open_in_memory().unwrap();
        let alert = Alert::high_stress("s1", StressLevel::High, 70, Utc::now());

        assert!(db.record_alert(&alert, "missing").await.is_err());
        assert!(db.list_alerts("s1", 10).await.unwrap().is_empty());
    }
}
