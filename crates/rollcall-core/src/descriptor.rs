//! Face descriptors and the distance-based match rule.
//!
//! A descriptor is the fixed-length embedding the recognition model emits for
//! one face crop. Matching is plain Euclidean distance against a fixed cutoff;
//! there is no gallery search — every check-in compares exactly one live probe
//! against one enrollment reference.

use thiserror::Error;

/// Length of the descriptor vector produced by the embedding model.
pub const DESCRIPTOR_DIM: usize = 128;

/// Euclidean-distance cutoff below which two descriptors count as the same face.
///
/// Calibrated for the shipped embedding model only: descriptors produced by any
/// other model (or another revision of this one) live in a different space and
/// this cutoff says nothing about them. Deliberately a constant, not
/// configuration.
pub const MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor has {actual} dimensions, expected {expected}")]
    WrongDimension { expected: usize, actual: usize },
}

/// A fixed-length face embedding.
///
/// Construction checks the dimension, so two descriptors can always be
/// compared without a length check at the call site. Values are raw model
/// output: the matching cutoff is calibrated on the un-normalized space, so
/// no L2 normalization is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    values: Vec<f32>,
    model_version: Option<String>,
}

impl Descriptor {
    /// Build a descriptor from raw values, rejecting wrong-length vectors.
    pub fn from_raw(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongDimension {
                expected: DESCRIPTOR_DIM,
                actual: values.len(),
            });
        }
        Ok(Self {
            values,
            model_version: None,
        })
    }

    /// Build a descriptor tagged with the model revision that produced it.
    pub fn from_model(values: Vec<f32>, model_version: &str) -> Result<Self, DescriptorError> {
        let mut descriptor = Self::from_raw(values)?;
        descriptor.model_version = Some(model_version.to_string());
        Ok(descriptor)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Model revision that produced this descriptor, if known.
    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    /// Euclidean distance to another descriptor.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Outcome of comparing a live probe against the enrollment reference.
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcome {
    /// Euclidean distance between the two descriptors.
    pub distance: f32,
    /// Strict `distance < MATCH_THRESHOLD`.
    pub matched: bool,
}

/// Compare a live probe against the enrollment reference.
///
/// The decision is strictly less-than: a distance exactly at the cutoff does
/// not match. Both descriptors must come from the same embedding model for
/// the cutoff to mean anything.
pub fn compare(reference: &Descriptor, probe: &Descriptor) -> MatchOutcome {
    let distance = reference.distance(probe);
    MatchOutcome {
        distance,
        matched: distance < MATCH_THRESHOLD,
    }
}
