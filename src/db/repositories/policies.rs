use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, parse_threshold, to_u32},
    models::{NotificationPolicy, PolicyInput},
};

fn row_to_policy(row: &Row) -> Result<NotificationPolicy> {
    let level_threshold: String = row.get("level_threshold")?;
    let last_sent: Option<String> = row.get("last_sent")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(NotificationPolicy {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        enabled: row.get("enabled")?,
        level_threshold: parse_threshold(&level_threshold)?,
        consecutive_count_threshold: to_u32(
            row.get("consecutive_count_threshold")?,
            "consecutive_count_threshold",
        )?,
        last_sent: parse_optional_datetime(last_sent, "last_sent")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn select_policy(
    conn: &rusqlite::Connection,
    subject_id: &str,
) -> Result<Option<NotificationPolicy>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, enabled, level_threshold, consecutive_count_threshold,
                last_sent, created_at, updated_at
         FROM notification_policies
         WHERE subject_id = ?1",
    )?;
    let mut rows = stmt.query(params![subject_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_policy(row)?)),
        None => Ok(None),
    }
}

impl Database {
    pub async fn get_policy(&self, subject_id: &str) -> Result<Option<NotificationPolicy>> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| select_policy(conn, &subject_id)).await
    }

    /// Create or replace a subject's policy settings. `last_sent` and the
    /// policy id survive an update.
    pub async fn upsert_policy(
        &self,
        subject_id: &str,
        input: PolicyInput,
    ) -> Result<NotificationPolicy> {
        if input.consecutive_count_threshold == 0 {
            bail!("consecutive_count_threshold must be at least 1");
        }

        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let now = format_datetime(&Utc::now());
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM notification_policies WHERE subject_id = ?1",
                    params![subject_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE notification_policies
                         SET enabled = ?1,
                             level_threshold = ?2,
                             consecutive_count_threshold = ?3,
                             updated_at = ?4
                         WHERE id = ?5",
                        params![
                            input.enabled,
                            input.level_threshold.as_str(),
                            input.consecutive_count_threshold,
                            now,
                            id,
                        ],
                    )
                    .with_context(|| "failed to update notification policy")?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO notification_policies (id, subject_id, enabled, level_threshold, consecutive_count_threshold, last_sent, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?6)",
                        params![
                            Uuid::new_v4().to_string(),
                            subject_id,
                            input.enabled,
                            input.level_threshold.as_str(),
                            input.consecutive_count_threshold,
                            now,
                        ],
                    )
                    .with_context(|| "failed to insert notification policy")?;
                }
            }

            let policy = select_policy(&tx, &subject_id)?
                .with_context(|| format!("policy for {subject_id} missing after upsert"))?;
            tx.commit()?;
            Ok(policy)
        })
        .await
    }
}
