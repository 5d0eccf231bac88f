use std::{path::Path, sync::Arc, time::Duration};

use rand::Rng;
use serde::Serialize;

use crate::error::DetectionError;

use super::locate::FaceRegion;
use super::model::{OnnxStressModel, StressModel};
use super::normalize::NormalizedImage;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_millis(2_000);

const FALLBACK_CONFIDENCE_MIN: f64 = 0.7;
const FALLBACK_CONFIDENCE_MAX: f64 = 0.95;

/// Operating mode, chosen once when the engine is built.
#[derive(Clone)]
pub enum ScoringMode {
    ModelBacked(Arc<dyn StressModel>),
    Fallback,
}

/// Engine output; identical shape in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreOutput {
    pub score: u8,
    pub confidence: f64,
    pub is_fallback: bool,
}

impl ScoreOutput {
    fn from_probability(probability: f32) -> Self {
        let p = probability.clamp(0.0, 1.0);
        Self {
            score: (p * 100.0).round() as u8,
            confidence: f64::from(p),
            is_fallback: false,
        }
    }

    /// Uniform random score and confidence, flagged as fallback.
    pub fn fallback() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            score: rng.gen_range(0..=100),
            confidence: rng.gen_range(FALLBACK_CONFIDENCE_MIN..=FALLBACK_CONFIDENCE_MAX),
            is_fallback: true,
        }
    }
}

#[derive(Clone)]
pub struct ScoreEngine {
    mode: ScoringMode,
    inference_timeout: Duration,
}

impl ScoreEngine {
    pub fn fallback() -> Self {
        Self {
            mode: ScoringMode::Fallback,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn with_model(model: Arc<dyn StressModel>, inference_timeout: Duration) -> Self {
        Self {
            mode: ScoringMode::ModelBacked(model),
            inference_timeout,
        }
    }

    /// Load the artifact at `path` if there is one. Any load failure selects
    /// fallback mode for the rest of the process lifetime.
    pub fn from_model_path(path: Option<&Path>, inference_timeout: Duration) -> Self {
        let Some(path) = path else {
            log_info!("no scoring model configured, running in fallback mode");
            return Self {
                inference_timeout,
                ..Self::fallback()
            };
        };

        if !path.exists() {
            log_info!(
                "scoring model {} not found, running in fallback mode",
                path.display()
            );
            return Self {
                inference_timeout,
                ..Self::fallback()
            };
        }

        match OnnxStressModel::load(path) {
            Ok(model) => {
                log_info!("loaded scoring model {}", path.display());
                Self::with_model(Arc::new(model), inference_timeout)
            }
            Err(err) => {
                log_warn!("failed to load scoring model, running in fallback mode: {err:#}");
                Self {
                    inference_timeout,
                    ..Self::fallback()
                }
            }
        }
    }

    pub fn is_model_backed(&self) -> bool {
        matches!(self.mode, ScoringMode::ModelBacked(_))
    }

    /// Score on the blocking pool, bounded by the inference timeout. Model
    /// errors, panics and timeouts degrade to a fallback score for this call only.
    pub async fn score_bounded(
        &self,
        image: NormalizedImage,
        region: Option<FaceRegion>,
    ) -> ScoreOutput {
        let ScoringMode::ModelBacked(model) = &self.mode else {
            return ScoreOutput::fallback();
        };

        let name = model.name().to_string();
        let worker = tokio::task::spawn_blocking({
            let model = Arc::clone(model);
            move || match region {
                Some(region) => model.predict(&image.crop(&region)),
                None => model.predict(&image),
            }
        });

        let result = match tokio::time::timeout(self.inference_timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DetectionError::Inference(format!(
                "inference worker failed: {join_err}"
            ))),
            Err(_) => Err(DetectionError::InferenceTimeout(self.inference_timeout)),
        };
        Self::resolve(&name, result)
    }

    fn resolve(model_name: &str, result: Result<f32, DetectionError>) -> ScoreOutput {
        match result {
            Ok(probability) if probability.is_finite() => ScoreOutput::from_probability(probability),
            Ok(probability) => {
                log_warn!("model {model_name} returned {probability}, using fallback score");
                ScoreOutput::fallback()
            }
            Err(err) => {
                log_warn!("model {model_name} failed, using fallback score: {err}");
                ScoreOutput::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::normalize::INPUT_SIZE;
    use image::{Rgb, Rgb32FImage};

    struct ConstantModel(f32);

    impl StressModel for ConstantModel {
        fn name(&self) -> &str {
            "constant"
        }
        fn predict(&self, _input: &NormalizedImage) -> Result<f32, DetectionError> {
            Ok(self.0)
        }
    }

    /// Mean of the red channel, so crops are observable.
    struct RedModel;

    impl StressModel for RedModel {
        fn name(&self) -> &str {
            "red"
        }
        fn predict(&self, input: &NormalizedImage) -> Result<f32, DetectionError> {
            let total: f32 = input.pixels().map(|p| p.0[0]).sum();
            Ok(total / (input.width() * input.height()) as f32)
        }
    }

    struct BrokenModel;

    impl StressModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }
        fn predict(&self, _input: &NormalizedImage) -> Result<f32, DetectionError> {
            Err(DetectionError::Inference("bad input shape".into()))
        }
    }

    struct PanickingModel;

    impl StressModel for PanickingModel {
        fn name(&self) -> &str {
            "panicking"
        }
        fn predict(&self, _input: &NormalizedImage) -> Result<f32, DetectionError> {
            panic!("runtime blew up")
        }
    }

    struct SlowModel;

    impl StressModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }
        fn predict(&self, _input: &NormalizedImage) -> Result<f32, DetectionError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(0.9)
        }
    }

    fn half_red() -> NormalizedImage {
        NormalizedImage::from_rgb32f(Rgb32FImage::from_fn(INPUT_SIZE, INPUT_SIZE, |x, _| {
            if x < INPUT_SIZE / 2 {
                Rgb([1.0, 0.0, 0.0])
            } else {
                Rgb([0.0, 0.0, 1.0])
            }
        }))
    }

    fn assert_fallback(output: ScoreOutput) {
        assert!(output.is_fallback);
        assert!(output.score <= 100);
        assert!((0.7..=0.95).contains(&output.confidence));
    }

    #[tokio::test]
    async fn fallback_mode_always_flags_and_stays_in_range() {
        let engine = ScoreEngine::fallback();
        assert!(!engine.is_model_backed());
        for _ in 0..500 {
            assert_fallback(engine.score_bounded(half_red(), None).await);
        }
    }

    #[tokio::test]
    async fn model_probability_maps_to_score_and_confidence() {
        let engine = ScoreEngine::with_model(Arc::new(ConstantModel(0.634)), DEFAULT_INFERENCE_TIMEOUT);
        let output = engine.score_bounded(half_red(), None).await;
        assert_eq!(output.score, 63);
        assert!((output.confidence - 0.634).abs() < 1e-6);
        assert!(!output.is_fallback);

        let edge = ScoreEngine::with_model(Arc::new(ConstantModel(0.999)), DEFAULT_INFERENCE_TIMEOUT);
        assert_eq!(edge.score_bounded(half_red(), None).await.score, 100);
    }

    #[tokio::test]
    async fn model_sees_face_crop_when_region_given() {
        let engine = ScoreEngine::with_model(Arc::new(RedModel), DEFAULT_INFERENCE_TIMEOUT);
        let whole = engine.score_bounded(half_red(), None).await;
        assert_eq!(whole.score, 50);

        let left = FaceRegion {
            x: 10,
            y: 10,
            width: 80,
            height: 80,
        };
        let cropped = engine.score_bounded(half_red(), Some(left)).await;
        assert_eq!(cropped.score, 100);
    }

    #[tokio::test]
    async fn model_errors_degrade_to_fallback_per_call() {
        let engine = ScoreEngine::with_model(Arc::new(BrokenModel), DEFAULT_INFERENCE_TIMEOUT);
        assert!(engine.is_model_backed());
        assert_fallback(engine.score_bounded(half_red(), None).await);
        // Mode is unchanged by the failure.
        assert!(engine.is_model_backed());
    }

    #[tokio::test]
    async fn non_finite_probability_is_treated_as_failure() {
        let engine = ScoreEngine::with_model(Arc::new(ConstantModel(f32::NAN)), DEFAULT_INFERENCE_TIMEOUT);
        assert_fallback(engine.score_bounded(half_red(), None).await);
    }

    #[tokio::test]
    async fn bounded_scoring_absorbs_panics() {
        let engine = ScoreEngine::with_model(Arc::new(PanickingModel), DEFAULT_INFERENCE_TIMEOUT);
        assert_fallback(engine.score_bounded(half_red(), None).await);
    }

    #[tokio::test]
    async fn bounded_scoring_times_out_to_fallback() {
        let engine = ScoreEngine::with_model(Arc::new(SlowModel), Duration::from_millis(20));
        assert_fallback(engine.score_bounded(half_red(), None).await);
    }

    #[tokio::test]
    async fn bounded_scoring_uses_model_when_healthy() {
        let engine = ScoreEngine::with_model(Arc::new(ConstantModel(0.25)), DEFAULT_INFERENCE_TIMEOUT);
        let output = engine.score_bounded(half_red(), None).await;
        assert_eq!(output.score, 25);
        assert!(!output.is_fallback);
    }

    #[test]
    fn missing_model_path_selects_fallback() {
        let missing = std::env::temp_dir().join("stress-sense-no-such-model.onnx");
        let engine = ScoreEngine::from_model_path(Some(&missing), DEFAULT_INFERENCE_TIMEOUT);
        assert!(!engine.is_model_backed());
        assert!(!ScoreEngine::from_model_path(None, DEFAULT_INFERENCE_TIMEOUT).is_model_backed());
    }

    #[tokio::test]
    async fn unloadable_model_selects_fallback() {
        let path = std::env::temp_dir().join(format!("{}-stress.onnx", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"not an onnx graph").unwrap();

        let engine = ScoreEngine::from_model_path(Some(&path), DEFAULT_INFERENCE_TIMEOUT);
        assert!(!engine.is_model_backed());
        assert_fallback(engine.score_bounded(half_red(), None).await);

        let _ = std::fs::remove_file(&path);
    }
}
