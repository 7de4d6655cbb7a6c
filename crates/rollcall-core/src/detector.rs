//! ULFD face detector via ONNX Runtime.
//!
//! Runs the Ultra-Light Fast Detector (RFB-320 export) whose graph already
//! decodes prior boxes: the model emits per-candidate class scores and
//! normalized corner boxes, so post-processing is confidence filtering plus
//! NMS, with no anchor arithmetic on our side.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const ULFD_INPUT_WIDTH: usize = 320;
const ULFD_INPUT_HEIGHT: usize = 240;
const ULFD_MEAN: f32 = 127.0;
const ULFD_STD: f32 = 128.0;
/// Reference post-processing values for the RFB-320 release.
const ULFD_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULFD_NMS_THRESHOLD: f32 = 0.3;
/// Score tensor lays out [background, face] per candidate.
const ULFD_CLASSES: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (expected the RFB-320 detector export)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in original-frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Output tensor indices: (scores_idx, boxes_idx).
type OutputIndices = (usize, usize);

/// ULFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_width: usize,
    input_height: usize,
    /// (scores, boxes) output positions, discovered by name at load time with
    /// a positional fallback.
    output_indices: OutputIndices,
}

impl FaceDetector {
    /// Load the ULFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded ULFD model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "ULFD model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "ULFD output tensor mapping");

        Ok(Self {
            session,
            input_width: ULFD_INPUT_WIDTH,
            input_height: ULFD_INPUT_HEIGHT,
            output_indices,
        })
    }

    /// Detect faces in a grayscale frame, returning boxes sorted by confidence.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let input = self.preprocess(frame, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let detections = decode_detections(
            scores,
            boxes,
            width as f32,
            height as f32,
            ULFD_CONFIDENCE_THRESHOLD,
        );

        // nms keeps detections in descending confidence order.
        Ok(nms(detections, ULFD_NMS_THRESHOLD))
    }

    /// Preprocess a grayscale frame into an NCHW float tensor.
    ///
    /// The RFB-320 graph expects a plain resize to 320x240; its priors absorb
    /// the aspect distortion, and output boxes are normalized to the original
    /// frame regardless. Bilinear sampling keeps edges usable at this scale.
    fn preprocess(&self, frame: &[u8], width: usize, height: usize) -> Array4<f32> {
        let inv_scale_x = width as f32 / self.input_width as f32;
        let inv_scale_y = height as f32 / self.input_height as f32;

        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_height, self.input_width));

        for y in 0..self.input_height {
            let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..self.input_width {
                let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
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

                let normalized = (val - ULFD_MEAN) / ULFD_STD;
                // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

/// Discover output tensor ordering by name.
///
/// The reference RFB-320 export names its outputs "scores" and "boxes"; other
/// conversions use generic numeric names, in which case the standard
/// positional order [0]=scores, [1]=boxes applies.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");

    match (scores, boxes) {
        (Some(s), Some(b)) => {
            tracing::info!("ULFD: using name-based output tensor mapping");
            (s, b)
        }
        _ => {
            tracing::info!(
                ?names,
                "ULFD: output names not recognized, using positional mapping [0]=scores, [1]=boxes"
            );
            (0, 1)
        }
    }
}

/// Filter decoded candidates by face confidence and map them to pixel space.
///
/// `scores` is the flattened [1, N, 2] class tensor, `boxes` the flattened
/// [1, N, 4] tensor of normalized corners (x1, y1, x2, y2).
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    frame_width: f32,
    frame_height: f32,
    threshold: f32,
) -> Vec<FaceBox> {
    let candidates = (scores.len() / ULFD_CLASSES).min(boxes.len() / 4);
    let mut detections = Vec::new();

    for idx in 0..candidates {
        let confidence = scores[idx * ULFD_CLASSES + 1];
        if confidence <= threshold {
            continue;
        }

        let off = idx * 4;
        let x1 = boxes[off].clamp(0.0, 1.0) * frame_width;
        let y1 = boxes[off + 1].clamp(0.0, 1.0) * frame_height;
        let x2 = boxes[off + 2].clamp(0.0, 1.0) * frame_width;
        let y2 = boxes[off + 3].clamp(0.0, 1.0) * frame_height;

        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
///
/// Returns the surviving boxes in descending confidence order.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two face boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
