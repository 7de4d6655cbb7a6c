//! Face embedder via ONNX Runtime.
//!
//! Turns one detected face into a 128-dimensional descriptor using the
//! ResNet-34 recognition export. The model is crop-tolerant: it takes a
//! margin-padded box crop, not a landmark-aligned face, so there is no
//! alignment stage ahead of it.

use crate::descriptor::Descriptor;
use crate::detector::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from ULFD!) ---
const EMBEDDER_INPUT_SIZE: usize = 150;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5; // symmetric normalization to [-1, 1]
/// Fraction of the detection box added on every side before cropping, so the
/// crop keeps chin, forehead and ears.
const EMBEDDER_CROP_MARGIN: f32 = 0.25;
pub(crate) const EMBEDDER_MODEL_VERSION: &str = "r34_128_v1";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} (expected the r34_128 recognition export)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Descriptor embedder over the r34_128 recognition model.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the recognition ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session })
    }

    /// Extract a descriptor for one detected face in a grayscale frame.
    ///
    /// The output is the model's raw 128-dimensional embedding. It is not
    /// L2-normalized: the matching cutoff is calibrated on the raw space.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Descriptor, EmbedderError> {
        let crop = crop_and_resize(frame, width as usize, height as usize, face);
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        Descriptor::from_model(raw_data.to_vec(), EMBEDDER_MODEL_VERSION)
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))
    }

    /// Preprocess a 150x150 grayscale crop into an NCHW float tensor.
    fn preprocess(crop: &[u8]) -> Array4<f32> {
        let size = EMBEDDER_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;

                let normalized = (pixel - EMBEDDER_MEAN) / EMBEDDER_STD;
                // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

/// Crop the margin-expanded face region and bilinear-resize it to the model
/// input size. The expanded region is clamped to the frame, so faces at the
/// edge produce a tighter crop instead of sampling out of bounds.
fn crop_and_resize(frame: &[u8], width: usize, height: usize, face: &FaceBox) -> Vec<u8> {
    let margin_x = face.width * EMBEDDER_CROP_MARGIN;
    let margin_y = face.height * EMBEDDER_CROP_MARGIN;
    let rx = (face.x - margin_x).max(0.0);
    let ry = (face.y - margin_y).max(0.0);
    let rx2 = (face.x + face.width + margin_x).min(width as f32);
    let ry2 = (face.y + face.height + margin_y).min(height as f32);
    let rw = (rx2 - rx).max(1.0);
    let rh = (ry2 - ry).max(1.0);

    let size = EMBEDDER_INPUT_SIZE;
    let mut crop = vec![0u8; size * size];

    for y in 0..size {
        let src_y = ry + (y as f32 + 0.5) * rh / size as f32 - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..size {
            let src_x = rx + (x as f32 + 0.5) * rw / size as f32 - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = frame[y0 * width + x0] as f32;
            let tr = frame[y0 * width + x1] as f32;
            let bl = frame[y1 * width + x0] as f32;
            let br = frame[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            crop[y * size + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    crop
}
