use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::{Alert, Database, NotificationPolicy, Reading};

/// Persistence the escalation monitor and the detection service depend on.
pub trait StressStore: Send + Sync {
    fn append_reading(&self, reading: &Reading) -> impl Future<Output = Result<String>> + Send;

    /// Readings for the subject at or after `since`, newest first.
    fn recent_readings(
        &self,
        subject_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Reading>>> + Send;

    fn get_policy(
        &self,
        subject_id: &str,
    ) -> impl Future<Output = Result<Option<NotificationPolicy>>> + Send;

    /// Store `alert` and set the policy's `last_sent` to the alert time as one
    /// unit: either both are written or neither is.
    fn record_alert(
        &self,
        alert: &Alert,
        policy_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl StressStore for Database {
    async fn append_reading(&self, reading: &Reading) -> Result<String> {
        self.insert_reading(reading).await
    }

    async fn recent_readings(
        &self,
        subject_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        Database::recent_readings(self, subject_id, since).await
    }

    async fn get_policy(&self, subject_id: &str) -> Result<Option<NotificationPolicy>> {
        Database::get_policy(self, subject_id).await
    }

    async fn record_alert(&self, alert: &Alert, policy_id: &str) -> Result<()> {
        Database::record_alert(self, alert, policy_id).await
    }
}
