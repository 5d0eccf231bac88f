//! Pre-trained scoring artifacts.
//!
//! The engine only needs "image in, stress probability out"; anything that can
//! provide that implements [`StressModel`]. The bundled implementation runs an
//! ONNX classifier through onnxruntime.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::ValueType;

use crate::error::DetectionError;

use super::normalize::{NormalizedImage, INPUT_SIZE};

const CHANNELS: i64 = 3;
const INTRA_THREADS: usize = 2;

pub trait StressModel: Send + Sync {
    fn name(&self) -> &str;

    /// Probability in [0, 1] that the face shows stress.
    fn predict(&self, input: &NormalizedImage) -> Result<f32, DetectionError>;
}

/// Accept only `[N, 224, 224, 3]` inputs, where the batch axis may be dynamic
/// (`-1`) or 1. Spatial axes must match the normalizer exactly.
fn check_input_shape(dimensions: &[i64]) -> Result<()> {
    let [batch, height, width, channels] = dimensions else {
        bail!("model input has rank {}, expected NHWC rank 4", dimensions.len());
    };

    if *batch != -1 && *batch != 1 {
        bail!("model input batch axis is {batch}, expected 1 or dynamic");
    }

    let side = i64::from(INPUT_SIZE);
    if *height != side || *width != side || *channels != CHANNELS {
        bail!(
            "model input is {height}x{width}x{channels}, expected {side}x{side}x{CHANNELS}"
        );
    }

    let elements = dimensions
        .iter()
        .map(|dim| (*dim).max(1))
        .try_fold(1i64, |acc, dim| acc.checked_mul(dim))
        .context("model input shape overflows")?;
    if elements != side * side * CHANNELS {
        bail!("model input holds {elements} values, expected {}", side * side * CHANNELS);
    }
    Ok(())
}

/// Binary stress classifier exported to ONNX. The first output is read as the
/// stress probability.
pub struct OnnxStressModel {
    name: String,
    session: Session,
}

impl OnnxStressModel {
    pub fn load(path: &Path) -> Result<Self> {
        let session = Session::builder()
            .context("failed to create onnxruntime session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set graph optimization level")?
            .with_intra_threads(INTRA_THREADS)
            .context("failed to set intra-op threads")?
            .commit_from_file(path)
            .with_context(|| format!("failed to load scoring model {}", path.display()))?;

        let Some(input) = session.inputs.first() else {
            bail!("scoring model {} declares no inputs", path.display());
        };
        match &input.input_type {
            ValueType::Tensor {
                ty: TensorElementType::Float32,
                dimensions,
                ..
            } => check_input_shape(dimensions)
                .with_context(|| format!("scoring model input '{}' rejected", input.name))?,
            other => bail!(
                "scoring model input '{}' must be a float32 tensor, found {other:?}",
                input.name
            ),
        }
        if session.outputs.is_empty() {
            bail!("scoring model {} declares no outputs", path.display());
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".into());
        Ok(Self { name, session })
    }

    /// `[1, 224, 224, 3]` in the normalizer's channel order and [0, 1] range.
    fn input_tensor(input: &NormalizedImage) -> Result<Array4<f32>, DetectionError> {
        let side = INPUT_SIZE as usize;
        Array4::from_shape_vec((1, side, side, CHANNELS as usize), input.as_raw().clone())
            .map_err(|err| {
                DetectionError::Inference(format!(
                    "input is {}x{}, model expects {side}x{side}: {err}",
                    input.width(),
                    input.height()
                ))
            })
    }
}

impl StressModel for OnnxStressModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, input: &NormalizedImage) -> Result<f32, DetectionError> {
        let inference = |err: ort::Error| DetectionError::Inference(err.to_string());

        let tensor = Self::input_tensor(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor].map_err(inference)?)
            .map_err(inference)?;
        let probabilities = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;

        probabilities
            .iter()
            .next()
            .copied()
            .ok_or_else(|| DetectionError::Inference("model returned an empty output".into()))
    }
}
