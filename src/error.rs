use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy of the scoring and escalation core.
///
/// Only the decode family is caller-caused. Inference failures never leave the
/// score engine; they are logged and replaced by a fallback score.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("image payload is empty")]
    EmptyImage,

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("invalid base64 image payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("stress score {0} is outside 0..=100")]
    InvalidScore(i32),

    #[error("model inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("escalation check failed: {0:#}")]
    EscalationCheckFailed(anyhow::Error),
}

impl DetectionError {
    /// True for errors caused by the submitted payload rather than by this process.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DetectionError::EmptyImage
                | DetectionError::Decode(_)
                | DetectionError::InvalidPayload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DetectionError>;
