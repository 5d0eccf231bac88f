//! Detection entry point shared by the CLI and the realtime watcher.
//!
//! A detection runs decode, localize, score and classify, then persists the
//! reading and only afterwards asks the escalation monitor for an alert. An
//! escalation failure never undoes the stored reading; it comes back as a
//! warning on the outcome.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::db::{
    Alert, DailyTrend, Database, NotificationPolicy, PolicyInput, Reading, ReadingSource,
};
use crate::detection::{Analysis, FaceRegion, ImagePayload, StressPipeline};
use crate::escalation::{EscalationMonitor, StressStore};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub subject_id: String,
    pub source: ReadingSource,
    pub payload: ImagePayload,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionOutcome {
    pub reading: Reading,
    pub analysis: Analysis,
    pub face: Option<FaceRegion>,
    pub alert: Option<Alert>,
    pub escalation_warning: Option<String>,
}

#[derive(Clone)]
pub struct StressService<S = Database> {
    store: S,
    pipeline: StressPipeline,
    monitor: EscalationMonitor,
}

impl<S: StressStore> StressService<S> {
    pub fn new(store: S, pipeline: StressPipeline, monitor: EscalationMonitor) -> Self {
        Self {
            store,
            pipeline,
            monitor,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pipeline(&self) -> &StressPipeline {
        &self.pipeline
    }

    /// Score one image for a subject. Payload and decode failures come back as
    /// a [`crate::error::DetectionError`] inside the `anyhow::Error`.
    pub async fn detect(&self, request: DetectionRequest) -> Result<DetectionOutcome> {
        let DetectionRequest {
            subject_id,
            source,
            payload,
            notes,
        } = request;

        let bytes = payload.into_bytes()?;
        let scored = self.pipeline.score(bytes).await?;

        let now = Utc::now();
        let reading = Reading::new(subject_id, source, notes, &scored.output, now)?;
        self.store
            .append_reading(&reading)
            .await
            .context("failed to persist stress reading")?;

        log_info!(
            "subject {} scored {} ({}){}",
            reading.subject_id(),
            reading.score(),
            reading.level(),
            if reading.is_fallback() { " [fallback]" } else { "" }
        );

        let (alert, escalation_warning) = match self.monitor.evaluate(&self.store, &reading, now).await {
            Ok(alert) => (alert, None),
            Err(err) => {
                log_warn!("reading {} stored without escalation: {err}", reading.id());
                (None, Some(err.to_string()))
            }
        };

        Ok(DetectionOutcome {
            reading,
            analysis: scored.analysis,
            face: scored.face,
            alert,
            escalation_warning,
        })
    }

}

/// Queries and policy management over the SQLite store.
impl StressService<Database> {
    pub async fn history(&self, subject_id: &str, limit: u32) -> Result<Vec<Reading>> {
        self.store.list_readings(subject_id, limit).await
    }

    pub async fn trend(&self, subject_id: &str, days: u32) -> Result<Vec<DailyTrend>> {
        self.store.daily_trend(subject_id, days, Utc::now()).await
    }

    pub async fn alerts(&self, subject_id: &str, limit: u32) -> Result<Vec<Alert>> {
        self.store.list_alerts(subject_id, limit).await
    }

    pub async fn policy(&self, subject_id: &str) -> Result<Option<NotificationPolicy>> {
        self.store.get_policy(subject_id).await
    }

    pub async fn configure_policy(
        &self,
        subject_id: &str,
        input: PolicyInput,
    ) -> Result<NotificationPolicy> {
        let policy = self.store.upsert_policy(subject_id, input).await?;
        log_info!(
            "policy for subject {} set to enabled={} threshold={} count={}",
            subject_id,
            policy.enabled,
            policy.level_threshold,
            policy.consecutive_count_threshold
        );
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AlertThreshold;
    use crate::detection::locate::tests::fixed_localizer;
    use crate::detection::normalize::{tests::encode_png, NormalizedImage};
    use crate::detection::{ScoreEngine, StressLevel, StressModel};
    use crate::error::DetectionError;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use chrono::DateTime;
    use image::{Rgb, RgbImage};
    use std::{
        future::Future,
        sync::{Arc, Mutex},
        time::Duration,
    };

    struct FixedModel(f32);

    impl StressModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }
        fn predict(&self, _input: &NormalizedImage) -> std::result::Result<f32, DetectionError> {
            Ok(self.0)
        }
    }

    fn pipeline(probability: f32) -> StressPipeline {
        let engine = ScoreEngine::with_model(Arc::new(FixedModel(probability)), Duration::from_secs(2));
        let face = FaceRegion {
            x: 60,
            y: 50,
            width: 110,
            height: 110,
        };
        StressPipeline::new(fixed_localizer(vec![face]), engine)
    }

    fn service(probability: f32) -> StressService {
        StressService::new(
            Database::open_in_memory().unwrap(),
            pipeline(probability),
            EscalationMonitor::default(),
        )
    }

    fn face_png() -> Vec<u8> {
        encode_png(RgbImage::from_pixel(320, 240, Rgb([200, 160, 140])))
    }

    fn request(subject: &str, payload: ImagePayload) -> DetectionRequest {
        DetectionRequest {
            subject_id: subject.to_string(),
            source: ReadingSource::Image,
            payload,
            notes: None,
        }
    }

    #[tokio::test]
    async fn detect_persists_reading() {
        let service = service(0.42);
        let outcome = service
            .detect(request("s1", ImagePayload::Bytes(face_png())))
            .await
            .unwrap();

        assert_eq!(outcome.reading.score(), 42);
        assert_eq!(outcome.reading.level(), StressLevel::Medium);
        assert_eq!(outcome.analysis, StressLevel::Medium.analysis());
        assert!(outcome.face.is_some());
        assert!(outcome.alert.is_none());
        assert!(outcome.escalation_warning.is_none());

        let stored = service.store().get_reading(outcome.reading.id()).await.unwrap();
        assert_eq!(stored, Some(outcome.reading));
    }

    #[tokio::test]
    async fn base64_payloads_are_accepted() {
        let service = service(0.1);
        let url = format!("data:image/png;base64,{}", STANDARD.encode(face_png()));
        let outcome = service
            .detect(request("s1", ImagePayload::Base64(url)))
            .await
            .unwrap();
        assert_eq!(outcome.reading.level(), StressLevel::Low);
    }

    #[tokio::test]
    async fn third_elevated_detection_raises_alert() {
        let service = service(0.66);
        service
            .configure_policy("s1", PolicyInput::default())
            .await
            .unwrap();

        for _ in 0..2 {
            let outcome = service
                .detect(request("s1", ImagePayload::Bytes(face_png())))
                .await
                .unwrap();
            assert!(outcome.alert.is_none());
        }
        let outcome = service
            .detect(request("s1", ImagePayload::Bytes(face_png())))
            .await
            .unwrap();

        let alert = outcome.alert.unwrap();
        assert!(alert.message.contains("HIGH"));
        assert!(alert.message.contains("66"));
        assert_eq!(service.alerts("s1", 10).await.unwrap().len(), 1);
        assert!(service.policy("s1").await.unwrap().unwrap().last_sent.is_some());
    }

    #[tokio::test]
    async fn rejected_image_is_client_error_and_not_stored() {
        let service = service(0.5);
        let err = service
            .detect(request("s1", ImagePayload::Bytes(b"definitely not a png".to_vec())))
            .await
            .unwrap_err();

        let detection = err.downcast_ref::<DetectionError>().unwrap();
        assert!(detection.is_client_error());
        assert!(service.history("s1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn severe_only_policy_skips_high_readings() {
        let service = service(0.6);
        service
            .configure_policy(
                "s1",
                PolicyInput {
                    enabled: true,
                    level_threshold: AlertThreshold::Severe,
                    consecutive_count_threshold: 1,
                },
            )
            .await
            .unwrap();
        let outcome = service
            .detect(request("s1", ImagePayload::Bytes(face_png())))
            .await
            .unwrap();
        assert!(outcome.alert.is_none());
        assert_eq!(service.trend("s1", 7).await.unwrap()[0].reading_count, 1);
    }

    /// Keeps readings in memory; policy lookups always fail.
    #[derive(Default)]
    struct PolicylessStore {
        readings: Mutex<Vec<Reading>>,
    }

    impl StressStore for PolicylessStore {
        fn append_reading(&self, reading: &Reading) -> impl Future<Output = Result<String>> + Send {
            let id = reading.id().to_string();
            if let Ok(mut readings) = self.readings.lock() {
                readings.push(reading.clone());
            }
            async move { Ok(id) }
        }

        fn recent_readings(
            &self,
            _subject_id: &str,
            _since: DateTime<Utc>,
        ) -> impl Future<Output = Result<Vec<Reading>>> + Send {
            async { Ok(Vec::new()) }
        }

        fn get_policy(
            &self,
            _subject_id: &str,
        ) -> impl Future<Output = Result<Option<NotificationPolicy>>> + Send {
            async { Err(anyhow::anyhow!("policy table locked")) }
        }

        fn record_alert(
            &self,
            _alert: &Alert,
            _policy_id: &str,
        ) -> impl Future<Output = Result<()>> + Send {
            async { Ok(()) }
        }
    }

    #[tokio::test]
    async fn escalation_failure_keeps_reading_and_warns() {
        let service = StressService::new(
            PolicylessStore::default(),
            pipeline(0.9),
            EscalationMonitor::default(),
        );
        let outcome = service
            .detect(request("s1", ImagePayload::Bytes(face_png())))
            .await
            .unwrap();

        let stored = service.store().readings.lock().unwrap().clone();
        assert_eq!(stored, vec![outcome.reading.clone()]);
        assert_eq!(outcome.reading.level(), StressLevel::Severe);
        assert!(outcome.alert.is_none());
        let warning = outcome.escalation_warning.unwrap();
        assert!(warning.contains("policy table locked"), "{warning}");
    }
}
