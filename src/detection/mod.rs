pub mod classify;
pub mod config;
pub mod engine;
pub mod locate;
pub mod model;
pub mod normalize;
pub mod payload;
pub mod pipeline;

pub use classify::{classify, Analysis, StressLevel};
pub use config::DetectorConfig;
pub use engine::{ScoreEngine, ScoreOutput, ScoringMode};
pub use locate::{select_largest, FaceDetector, FaceLocalizer, FaceRegion, SeetaDetector};
pub use model::{OnnxStressModel, StressModel};
pub use normalize::{normalize, NormalizedImage, INPUT_SIZE};
pub use payload::ImagePayload;
pub use pipeline::{ScoredImage, StressPipeline};
