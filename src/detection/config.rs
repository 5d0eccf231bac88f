use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Face detector settings. The SeetaFace frontal model file is loaded once at
/// startup; without it the localizer reports no face for every image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Path to `seeta_fd_frontal_v1.0.bin`. Relative paths resolve against the
    /// data directory.
    pub model_path: Option<PathBuf>,

    /// Smallest face searched for, in normalized-image pixels (at least 20)
    pub min_face_size: u32,

    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: Some(PathBuf::from("seeta_fd_frontal_v1.0.bin")),
            min_face_size: 40,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }
}
