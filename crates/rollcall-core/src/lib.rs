//! rollcall-core — face detection, descriptor extraction and matching.
//!
//! Uses the ULFD RFB-320 detector and an r34_128 recognition model, both
//! running via ONNX Runtime for CPU inference.

pub mod descriptor;
pub mod detector;
pub mod embedder;
pub mod extract;

pub use descriptor::{
    compare, Descriptor, DescriptorError, MatchOutcome, DESCRIPTOR_DIM, MATCH_THRESHOLD,
};
pub use detector::FaceBox;
pub use extract::{DescriptorPipeline, ExtractError, FacePolicy};
