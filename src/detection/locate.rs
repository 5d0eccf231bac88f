use std::{fs, io::Cursor, path::Path, sync::Arc};

use anyhow::{Context, Result};
use image::GrayImage;
use rustface::ImageData;
use serde::{Deserialize, Serialize};

use super::config::DetectorConfig;
use super::normalize::NormalizedImage;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Axis-aligned face rectangle in normalized-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Clip a detector box, which may start left of or above the frame, to
    /// `bounds`. Boxes with nothing left inside the frame are dropped.
    fn clipped(x: i32, y: i32, width: u32, height: u32, bounds: (u32, u32)) -> Option<Self> {
        let (frame_w, frame_h) = bounds;
        let right = i64::from(x) + i64::from(width);
        let bottom = i64::from(y) + i64::from(height);
        let left = i64::from(x).max(0);
        let top = i64::from(y).max(0);
        let right = right.min(i64::from(frame_w));
        let bottom = bottom.min(i64::from(frame_h));
        if right <= left || bottom <= top {
            return None;
        }

        Some(Self {
            x: u32::try_from(left).ok()?,
            y: u32::try_from(top).ok()?,
            width: u32::try_from(right - left).ok()?,
            height: u32::try_from(bottom - top).ok()?,
        })
    }
}

/// Pluggable face-candidate search.
///
/// A single instance is shared by every concurrent request, so `detect` takes
/// `&self`.
pub trait FaceDetector: Send + Sync {
    /// Candidate rectangles in the detector's own order.
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion>;
}

/// Pick the candidate with the largest area; on ties the earliest one wins.
pub fn select_largest(candidates: &[FaceRegion]) -> Option<FaceRegion> {
    let mut best: Option<FaceRegion> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.area() <= current.area() => {}
            _ => best = Some(*candidate),
        }
    }
    best
}

/// SeetaFace frontal detector via `rustface`.
///
/// rustface detectors keep per-run state behind `&mut self` and are not
/// `Send`, so the model file is read once and a detector is built from the
/// cached bytes for each call.
pub struct SeetaDetector {
    model: Vec<u8>,
    config: Arc<DetectorConfig>,
}

impl SeetaDetector {
    pub fn load(path: &Path, config: Arc<DetectorConfig>) -> Result<Self> {
        let model = fs::read(path)
            .with_context(|| format!("failed to read face detector model {}", path.display()))?;
        rustface::read_model(Cursor::new(model.as_slice()))
            .with_context(|| format!("failed to parse face detector model {}", path.display()))?;
        Ok(Self { model, config })
    }

    fn build(&self) -> Result<Box<dyn rustface::Detector>> {
        let model = rustface::read_model(Cursor::new(self.model.as_slice()))
            .context("failed to parse cached face detector model")?;
        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(self.config.min_face_size.max(20));
        detector.set_score_thresh(self.config.score_thresh);
        detector.set_pyramid_scale_factor(self.config.pyramid_scale_factor);
        detector.set_slide_window_step(
            self.config.slide_window_step,
            self.config.slide_window_step,
        );
        Ok(detector)
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion> {
        let mut detector = match self.build() {
            Ok(detector) => detector,
            Err(err) => {
                log_warn!("face detector unavailable for this image: {err:#}");
                return Vec::new();
            }
        };

        let (width, height) = gray.dimensions();
        let image = ImageData::new(gray.as_raw(), width, height);
        detector
            .detect(&image)
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                FaceRegion::clipped(bbox.x(), bbox.y(), bbox.width(), bbox.height(), (width, height))
            })
            .collect()
    }
}

/// Finds the most prominent face in a normalized image.
#[derive(Clone)]
pub struct FaceLocalizer {
    detector: Option<Arc<dyn FaceDetector>>,
}

impl FaceLocalizer {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            detector: Some(detector),
        }
    }

    /// A localizer that never finds a face; every image is scored whole.
    pub fn disabled() -> Self {
        Self { detector: None }
    }

    /// Load the configured detector model once. A missing or unreadable model
    /// leaves the localizer disabled.
    pub fn with_config(config: Arc<DetectorConfig>) -> Self {
        let Some(path) = config.model_path.clone() else {
            log_info!("no face detector model configured, scoring whole images");
            return Self::disabled();
        };

        if !path.exists() {
            log_info!(
                "face detector model {} not found, scoring whole images",
                path.display()
            );
            return Self::disabled();
        }

        match SeetaDetector::load(&path, config) {
            Ok(detector) => {
                log_info!("loaded face detector model {}", path.display());
                Self::new(Arc::new(detector))
            }
            Err(err) => {
                log_warn!("face detector disabled: {err:#}");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.detector.is_some()
    }

    /// `None` means no face was found and the caller should use the whole image.
    pub fn locate(&self, image: &NormalizedImage) -> Option<FaceRegion> {
        let detector = self.detector.as_ref()?;
        let candidates = detector.detect(&image.luma());
        let selected = select_largest(&candidates);
        match selected {
            Some(region) => log_debug!(
                "{} face candidate(s), selected {}x{} at ({}, {})",
                candidates.len(),
                region.width,
                region.height,
                region.x,
                region.y
            ),
            None => log_debug!("no face detected, using whole image"),
        }
        selected
    }
}
