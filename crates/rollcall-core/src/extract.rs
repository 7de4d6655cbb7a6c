//! One-shot descriptor extraction.
//!
//! Composes the detector and the embedder into a single pipeline applied to
//! exactly one frame at a time: detect, pick one face per policy, embed.
//! Live captures and enrollment portraits go through the same pipeline, which
//! is what makes their descriptors comparable.

use crate::descriptor::Descriptor;
use crate::detector::{DetectorError, FaceBox, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face found in the frame")]
    NoFace,
    #[error("{count} faces found where exactly one was expected")]
    Ambiguous { count: usize },
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// How to pick a face when the detector returns more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacePolicy {
    /// Take the most confident detection. The kiosk simplification: one
    /// person is expected in front of the camera.
    #[default]
    FirstDetection,
    /// Refuse frames containing more than one face.
    RejectAmbiguous,
}

/// Pick the face to embed from a confidence-sorted detection list.
pub fn select_face(faces: &[FaceBox], policy: FacePolicy) -> Result<&FaceBox, ExtractError> {
    match (faces.len(), policy) {
        (0, _) => Err(ExtractError::NoFace),
        (1, _) => Ok(&faces[0]),
        (_, FacePolicy::FirstDetection) => Ok(&faces[0]),
        (count, FacePolicy::RejectAmbiguous) => Err(ExtractError::Ambiguous { count }),
    }
}

/// Detector and embedder loaded together, applied to single frames.
pub struct DescriptorPipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    policy: FacePolicy,
}

impl DescriptorPipeline {
    /// Load both models. This is the slow part of session start; callers do
    /// it before touching any camera hardware.
    pub fn load(
        detector_model: &str,
        embedder_model: &str,
        policy: FacePolicy,
    ) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(detector_model)?;
        let embedder = FaceEmbedder::load(embedder_model)?;
        tracing::info!(?policy, "descriptor pipeline ready");
        Ok(Self {
            detector,
            embedder,
            policy,
        })
    }

    /// Extract the descriptor of the selected face in a grayscale frame.
    ///
    /// `frame` must hold `width * height` luma bytes.
    pub fn descriptor_from_gray(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Descriptor, ExtractError> {
        let faces = self.detector.detect(frame, width, height)?;
        let face = select_face(&faces, self.policy)?;
        tracing::debug!(
            candidates = faces.len(),
            confidence = face.confidence,
            "face selected"
        );
        Ok(self.embedder.extract(frame, width, height, face)?)
    }

    /// Decode an encoded image (e.g. an enrollment portrait) and extract its
    /// descriptor. Color inputs are collapsed to luma so portraits and camera
    /// frames share one code path.
    pub fn descriptor_from_image(&mut self, bytes: &[u8]) -> Result<Descriptor, ExtractError> {
        let gray = image::load_from_memory(bytes)?.to_luma8();
        let (width, height) = gray.dimensions();
        self.descriptor_from_gray(gray.as_raw(), width, height)
    }
}
