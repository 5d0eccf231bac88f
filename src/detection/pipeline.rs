use std::sync::Arc;

use serde::Serialize;

use crate::error::{DetectionError, Result};

use super::classify::{classify, Analysis, StressLevel};
use super::config::DetectorConfig;
use super::engine::{ScoreEngine, ScoreOutput};
use super::locate::{FaceLocalizer, FaceRegion};
use super::normalize::normalize;

/// Everything the pipeline learned about one image.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredImage {
    pub face: Option<FaceRegion>,
    pub output: ScoreOutput,
    pub level: StressLevel,
    pub analysis: Analysis,
}

/// Normalizer, localizer, score engine and classifier wired together.
///
/// Cheap to clone; the detector and the model are shared read-only between
/// clones.
#[derive(Clone)]
pub struct StressPipeline {
    localizer: FaceLocalizer,
    engine: ScoreEngine,
}

impl StressPipeline {
    pub fn new(localizer: FaceLocalizer, engine: ScoreEngine) -> Self {
        Self { localizer, engine }
    }

    pub fn with_config(config: Arc<DetectorConfig>, engine: ScoreEngine) -> Self {
        Self::new(FaceLocalizer::with_config(config), engine)
    }

    pub fn engine(&self) -> &ScoreEngine {
        &self.engine
    }

    pub fn localizer(&self) -> &FaceLocalizer {
        &self.localizer
    }

    /// Decode and localize on the blocking pool, then score with the engine's
    /// inference timeout. Only decode failures are returned as errors.
    pub async fn score(&self, bytes: Vec<u8>) -> Result<ScoredImage> {
        let localizer = self.localizer.clone();
        let (image, face) = tokio::task::spawn_blocking(move || {
            let image = normalize(&bytes)?;
            let face = localizer.locate(&image);
            Ok::<_, DetectionError>((image, face))
        })
        .await
        .map_err(|err| DetectionError::Inference(format!("preprocessing worker failed: {err}")))??;

        let output = self.engine.score_bounded(image, face).await;
        Self::finish(face, output)
    }

    fn finish(face: Option<FaceRegion>, output: ScoreOutput) -> Result<ScoredImage> {
        let (level, analysis) = classify(i32::from(output.score))?;
        Ok(ScoredImage {
            face,
            output,
            level,
            analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::locate::tests::fixed_localizer;
    use crate::detection::model::StressModel;
    use crate::detection::normalize::{tests::encode_png, NormalizedImage};
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    struct FixedModel(f32);

    impl StressModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }
        fn predict(&self, _input: &NormalizedImage) -> std::result::Result<f32, DetectionError> {
            Ok(self.0)
        }
    }

    fn face() -> FaceRegion {
        FaceRegion {
            x: 60,
            y: 50,
            width: 110,
            height: 110,
        }
    }

    fn png() -> Vec<u8> {
        encode_png(RgbImage::from_pixel(320, 240, Rgb([180, 140, 120])))
    }

    #[tokio::test]
    async fn model_backed_scoring_classifies_output() {
        let engine = ScoreEngine::with_model(Arc::new(FixedModel(0.8)), Duration::from_secs(2));
        let pipeline = StressPipeline::new(fixed_localizer(vec![face()]), engine);
        let scored = pipeline.score(png()).await.unwrap();

        assert_eq!(scored.output.score, 80);
        assert!(!scored.output.is_fallback);
        assert_eq!(scored.level, StressLevel::Severe);
        assert_eq!(scored.analysis, StressLevel::Severe.analysis());
        assert_eq!(scored.face, Some(face()));
    }

    #[tokio::test]
    async fn faceless_image_still_scores() {
        let engine = ScoreEngine::with_model(Arc::new(FixedModel(0.3)), Duration::from_secs(2));
        let scored = StressPipeline::new(FaceLocalizer::disabled(), engine)
            .score(png())
            .await
            .unwrap();

        assert_eq!(scored.face, None);
        assert_eq!(scored.level, StressLevel::Medium);
    }

    #[tokio::test]
    async fn decode_errors_propagate() {
        let err = StressPipeline::new(FaceLocalizer::disabled(), ScoreEngine::fallback())
            .score(b"not an image".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn fallback_output_is_classified_consistently() {
        let pipeline = StressPipeline::with_config(
            Arc::new(DetectorConfig {
                model_path: None,
                ..DetectorConfig::default()
            }),
            ScoreEngine::fallback(),
        );
        let scored = pipeline.score(png()).await.unwrap();
        assert!(scored.output.is_fallback);
        assert_eq!(scored.face, None);
        assert_eq!(
            classify(i32::from(scored.output.score)).unwrap().0,
            scored.level
        );
    }
}
