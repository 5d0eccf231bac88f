//! Decides, after each persisted reading, whether the subject should be
//! alerted. The elevated-reading count is recomputed from storage on every
//! call; nothing is cached between readings.

use std::future::Future;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::{Alert, Reading};
use crate::error::DetectionError;

use super::config::EscalationConfig;
use super::store::StressStore;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Default)]
pub struct EscalationMonitor {
    config: EscalationConfig,
}

impl EscalationMonitor {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Evaluate `reading` against the subject's policy. Returns the alert that
    /// was raised and recorded, if any. Storage failures and read timeouts
    /// surface as [`DetectionError::EscalationCheckFailed`].
    ///
    /// Only the policy and history reads are bounded by the timeout. The alert
    /// write is a single transaction and is always awaited, so a check never
    /// stops between storing the alert and stamping `last_sent`.
    pub async fn evaluate<S: StressStore>(
        &self,
        store: &S,
        reading: &Reading,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, DetectionError> {
        self.check(store, reading, now).await.map_err(|err| {
            log_warn!(
                "escalation check failed for subject {}: {err:#}",
                reading.subject_id()
            );
            DetectionError::EscalationCheckFailed(err)
        })
    }

    async fn bounded_read<T>(
        &self,
        what: &str,
        read: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result.with_context(|| format!("failed to load {what}")),
            Err(_) => bail!("loading {what} timed out after {timeout:?}"),
        }
    }

    async fn check<S: StressStore>(
        &self,
        store: &S,
        reading: &Reading,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let Some(policy) = self
            .bounded_read("notification policy", store.get_policy(reading.subject_id()))
            .await?
        else {
            return Ok(None);
        };

        if !policy.enabled || !policy.level_threshold.admits(reading.level()) {
            return Ok(None);
        }

        if let (Some(cooldown), Some(last_sent)) = (self.config.cooldown(), policy.last_sent) {
            if now - last_sent < cooldown {
                log_debug!(
                    "subject {} alerted at {last_sent}, still cooling down",
                    reading.subject_id()
                );
                return Ok(None);
            }
        }

        let recent = self
            .bounded_read(
                "recent readings",
                store.recent_readings(reading.subject_id(), now - self.config.window()),
            )
            .await?;

        let mut elevated = recent.iter().filter(|r| r.level().is_elevated()).count();
        if reading.level().is_elevated() && !recent.iter().any(|r| r.id() == reading.id()) {
            elevated += 1;
        }

        if elevated < policy.consecutive_count_threshold as usize {
            log_debug!(
                "subject {} has {elevated}/{} elevated readings",
                reading.subject_id(),
                policy.consecutive_count_threshold
            );
            return Ok(None);
        }

        let alert = Alert::high_stress(reading.subject_id(), reading.level(), reading.score(), now);
        store
            .record_alert(&alert, &policy.id)
            .await
            .context("failed to record alert")?;

        log_info!(
            "raised {} alert for subject {} ({elevated} elevated readings)",
            reading.level(),
            reading.subject_id()
        );
        Ok(Some(alert))
    }
}
