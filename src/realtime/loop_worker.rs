use anyhow::{bail, Context, Result};
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::ReadingSource;
use crate::detection::ImagePayload;
use crate::service::{DetectionOutcome, DetectionRequest, StressService};

use super::config::RealtimeConfig;
use super::phash::{compute_hamming_distance, compute_phash};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// What one tick of the watcher did.
#[derive(Debug)]
pub enum CaptureOutcome {
    NoFrame,
    Unchanged,
    Duplicate { distance: u32 },
    Scored(Box<DetectionOutcome>),
}

/// Newest frame on disk, read and hashed but not yet scored.
enum FrameRead {
    NoFrame,
    Unchanged,
    Duplicate {
        path: PathBuf,
        modified: SystemTime,
        distance: u32,
    },
    Fresh {
        path: PathBuf,
        modified: SystemTime,
        bytes: Vec<u8>,
        phash: Option<String>,
    },
}

/// Per-watch memory of the last frame seen and the last frame scored.
#[derive(Debug, Default)]
pub struct WatchState {
    last_frame: Option<(PathBuf, SystemTime)>,
    last_scored_phash: Option<String>,
}

pub async fn watch_loop(
    subject_id: String,
    frame_dir: PathBuf,
    service: StressService,
    config: RealtimeConfig,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = WatchState::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match perform_capture(&subject_id, &frame_dir, &service, &config, &mut state).await {
                    Ok(outcome) => report(&subject_id, &outcome),
                    Err(err) => log_error!("frame capture failed for subject {}: {err:?}", subject_id),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("frame watcher shutting down");
                break;
            }
        }
    }
}

fn report(subject_id: &str, outcome: &CaptureOutcome) {
    match outcome {
        CaptureOutcome::NoFrame | CaptureOutcome::Unchanged => {}
        CaptureOutcome::Duplicate { distance } => {
            log_debug!("skipping near-duplicate frame (distance {distance})");
        }
        CaptureOutcome::Scored(detection) => {
            if let Some(alert) = &detection.alert {
                log_warn!("{} for subject {}: {}", alert.title, subject_id, alert.message);
            }
            if let Some(warning) = &detection.escalation_warning {
                log_warn!("escalation skipped for subject {}: {warning}", subject_id);
            }
        }
    }
}

/// Score the newest frame in `frame_dir` unless it was already seen or looks
/// like the last scored frame.
///
/// Only reading and hashing the frame is bounded by the capture timeout.
/// Scoring runs under the engine's inference timeout and the escalation
/// monitor's read timeout, and is never abandoned halfway.
pub async fn perform_capture(
    subject_id: &str,
    frame_dir: &Path,
    service: &StressService,
    config: &RealtimeConfig,
    state: &mut WatchState,
) -> Result<CaptureOutcome> {
    let capture_start = Instant::now();

    let read = tokio::time::timeout(config.capture_timeout(), read_frame(frame_dir, config, state));
    let (path, bytes, phash) = match read.await {
        Ok(frame) => match frame? {
            FrameRead::NoFrame => return Ok(CaptureOutcome::NoFrame),
            FrameRead::Unchanged => return Ok(CaptureOutcome::Unchanged),
            FrameRead::Duplicate {
                path,
                modified,
                distance,
            } => {
                state.last_frame = Some((path, modified));
                return Ok(CaptureOutcome::Duplicate { distance });
            }
            FrameRead::Fresh {
                path,
                modified,
                bytes,
                phash,
            } => {
                state.last_frame = Some((path.clone(), modified));
                (path, bytes, phash)
            }
        },
        Err(_) => bail!(
            "reading frame from {} timed out after {}s",
            frame_dir.display(),
            config.capture_timeout_secs
        ),
    };

    let notes = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    let outcome = service
        .detect(DetectionRequest {
            subject_id: subject_id.to_string(),
            source: ReadingSource::Realtime,
            payload: ImagePayload::Bytes(bytes),
            notes,
        })
        .await
        .with_context(|| format!("failed to score frame {}", path.display()))?;

    state.last_scored_phash = phash;

    log_info!(
        "frame {} scored {} ({}) in {}ms",
        path.display(),
        outcome.reading.score(),
        outcome.reading.level(),
        capture_start.elapsed().as_millis()
    );

    Ok(CaptureOutcome::Scored(Box::new(outcome)))
}

/// Find, read and hash the newest frame. Leaves `state` untouched so an
/// abandoned read has no effect.
async fn read_frame(
    frame_dir: &Path,
    config: &RealtimeConfig,
    state: &WatchState,
) -> Result<FrameRead> {
    let Some((path, modified)) = newest_frame(frame_dir).await? else {
        return Ok(FrameRead::NoFrame);
    };
    if state
        .last_frame
        .as_ref()
        .is_some_and(|(last_path, last_modified)| *last_path == path && *last_modified == modified)
    {
        return Ok(FrameRead::Unchanged);
    }

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read frame {}", path.display()))?;

    let phash = tokio::task::spawn_blocking({
        let bytes = bytes.clone();
        move || compute_phash(&bytes)
    })
    .await
    .context("phash worker join failed")?;

    // Undecodable frames still go through detection so the rejection is
    // reported the same way as any other bad image.
    if let (Ok(current), Some(previous)) = (&phash, state.last_scored_phash.as_deref()) {
        let distance = compute_hamming_distance(current, previous);
        if distance < config.duplicate_distance {
            return Ok(FrameRead::Duplicate {
                path,
                modified,
                distance,
            });
        }
    }

    Ok(FrameRead::Fresh {
        path,
        modified,
        bytes,
        phash: phash.ok(),
    })
}

async fn newest_frame(frame_dir: &Path) -> Result<Option<(PathBuf, SystemTime)>> {
    let mut entries = tokio::fs::read_dir(frame_dir)
        .await
        .with_context(|| format!("failed to list frame directory {}", frame_dir.display()))?;

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_frame(&path) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        let newer = match &newest {
            Some((newest_path, newest_modified)) => {
                modified > *newest_modified || (modified == *newest_modified && path > *newest_path)
            }
            None => true,
        };
        if newer {
            newest = Some((path, modified));
        }
    }
    Ok(newest)
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::detection::normalize::{tests::encode_png, NormalizedImage};
    use crate::detection::{FaceLocalizer, ScoreEngine, StressModel, StressPipeline};
    use crate::error::DetectionError;
    use crate::escalation::EscalationMonitor;
    use image::{Rgb, RgbImage};
    use std::{sync::Arc, time::Duration};

    fn service_with(engine: ScoreEngine) -> StressService {
        StressService::new(
            Database::open_in_memory().unwrap(),
            StressPipeline::new(FaceLocalizer::disabled(), engine),
            EscalationMonitor::default(),
        )
    }

    fn service() -> StressService {
        service_with(ScoreEngine::fallback())
    }

    fn frame_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stress-sense-frames-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ramp(horizontal: bool) -> Vec<u8> {
        encode_png(RgbImage::from_fn(64, 64, |x, y| {
            let v = (if horizontal { x } else { y } * 4) as u8;
            Rgb([v, v, v])
        }))
    }

    #[tokio::test]
    async fn empty_directory_has_no_frame() {
        let dir = frame_dir();
        std::fs::write(dir.join("notes.txt"), b"not a frame").unwrap();
        let outcome = perform_capture("s1", &dir, &service(), &RealtimeConfig::default(), &mut WatchState::default())
            .await
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::NoFrame));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn scores_new_frames_and_skips_repeats() {
        let dir = frame_dir();
        let service = service();
        let config = RealtimeConfig::default();
        let mut state = WatchState::default();

        std::fs::write(dir.join("frame-001.png"), ramp(true)).unwrap();
        let first = perform_capture("s1", &dir, &service, &config, &mut state).await.unwrap();
        let outcome = match first {
            CaptureOutcome::Scored(outcome) => outcome,
            other => panic!("expected first frame to be scored, got {other:?}"),
        };
        assert_eq!(outcome.reading.source(), ReadingSource::Realtime);
        assert_eq!(outcome.reading.notes(), Some("frame-001.png"));
        assert!(outcome.reading.is_fallback());

        let again = perform_capture("s1", &dir, &service, &config, &mut state).await.unwrap();
        assert!(matches!(again, CaptureOutcome::Unchanged));

        // Same picture under a new name is a near duplicate.
        state.last_frame = None;
        std::fs::remove_file(dir.join("frame-001.png")).unwrap();
        std::fs::write(dir.join("frame-002.png"), ramp(true)).unwrap();
        let duplicate = perform_capture("s1", &dir, &service, &config, &mut state).await.unwrap();
        assert!(matches!(duplicate, CaptureOutcome::Duplicate { distance: 0 }));
        let seen = perform_capture("s1", &dir, &service, &config, &mut state).await.unwrap();
        assert!(matches!(seen, CaptureOutcome::Unchanged));

        std::fs::remove_file(dir.join("frame-002.png")).unwrap();
        std::fs::write(dir.join("frame-003.png"), ramp(false)).unwrap();
        let changed = perform_capture("s1", &dir, &service, &config, &mut state).await.unwrap();
        assert!(matches!(changed, CaptureOutcome::Scored(_)));

        assert_eq!(service.history("s1", 10).await.unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn watch_loop_stops_on_cancel() {
        let dir = frame_dir();
        let token = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(
            "s1".into(),
            dir.clone(),
            service(),
            RealtimeConfig::default(),
            token.clone(),
        ));
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    struct SlowModel;

    impl StressModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }
        fn predict(&self, _input: &NormalizedImage) -> std::result::Result<f32, DetectionError> {
            std::thread::sleep(Duration::from_millis(1_300));
            Ok(0.4)
        }
    }

    #[tokio::test]
    async fn scoring_longer_than_capture_timeout_completes() {
        let dir = frame_dir();
        std::fs::write(dir.join("frame-001.png"), ramp(true)).unwrap();
        let service = service_with(ScoreEngine::with_model(
            Arc::new(SlowModel),
            Duration::from_secs(5),
        ));
        let config = RealtimeConfig {
            capture_timeout_secs: 1,
            ..RealtimeConfig::default()
        };
        let mut state = WatchState::default();

        let outcome = perform_capture("s1", &dir, &service, &config, &mut state)
            .await
            .unwrap();
        let detection = match outcome {
            CaptureOutcome::Scored(detection) => detection,
            other => panic!("expected the frame to be scored, got {other:?}"),
        };
        assert!(!detection.reading.is_fallback());
        assert_eq!(detection.reading.score(), 40);
        assert_eq!(service.history("s1", 10).await.unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn frame_extensions_are_case_insensitive() {
        assert!(is_frame(Path::new("a/b/FRAME.PNG")));
        assert!(is_frame(Path::new("shot.jpeg")));
        assert!(!is_frame(Path::new("shot.gif")));
        assert!(!is_frame(Path::new("README")));
    }
}
