//! Error vocabulary for the check-in daemon.
//!
//! [`CheckinError`] is the taxonomy the flow reports to callers; the smaller
//! enums carry failures across the trait seams in [`crate::ports`] and get
//! folded into it at the call site that knows the context.

use thiserror::Error;

/// Which session resource failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Models,
    Camera,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Models => "models",
            Resource::Camera => "camera",
        }
    }
}

/// Session-start acquisition failures. Models and camera are reported
/// separately so the shell can tell "no recognition runtime" apart from
/// "no camera permission".
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("face models unavailable: {0}")]
    Models(#[source] anyhow::Error),
    #[error("camera unavailable: {0}")]
    Camera(#[source] anyhow::Error),
}

/// Failures from a running descriptor engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no face found in the frame")]
    NoFace,
    #[error("{count} faces found where exactly one was expected")]
    Ambiguous { count: usize },
    #[error("camera capture failed: {0}")]
    Capture(#[source] anyhow::Error),
    #[error("inference failed: {0}")]
    Inference(#[source] anyhow::Error),
    #[error("image decode failed: {0}")]
    Decode(#[source] anyhow::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Datastore failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An attendance row for this token already exists.
    #[error("attendance already recorded for this token")]
    DuplicateToken,
    #[error(transparent)]
    Database(#[from] tokio_rusqlite::Error),
}

/// Enrollment portrait download failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    TimedOut,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Everything one check-in attempt can fail with.
///
/// Retryable variants leave the session at the live screen; the rest are
/// terminal and release camera and models on the way out.
#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("{} unavailable: {source}", .resource.as_str())]
    ResourceUnavailable {
        resource: Resource,
        #[source]
        source: anyhow::Error,
    },
    #[error("no face detected in the live frame")]
    NoFaceDetected,
    #[error("{count} faces in the live frame")]
    AmbiguousFaces { count: usize },
    #[error("no enrollment portrait on file")]
    ReferenceMissing,
    #[error("enrollment portrait could not be processed")]
    ReferenceUnusable,
    #[error("face did not match (distance {distance:.3})")]
    NoMatch { distance: f32 },
    #[error("unknown check-in code")]
    TokenInvalid,
    #[error("check-in code expired")]
    TokenExpired,
    #[error("attendance already recorded for this code")]
    AlreadyUsed,
    #[error("no authenticated student")]
    NotAuthenticated,
    #[error("could not persist the attendance record: {0}")]
    PersistenceFailed(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CheckinError {
    /// Stable machine-readable tag, part of the D-Bus payload contract.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckinError::ResourceUnavailable { .. } => "RESOURCE_UNAVAILABLE",
            CheckinError::NoFaceDetected => "NO_FACE",
            CheckinError::AmbiguousFaces { .. } => "AMBIGUOUS_FACES",
            CheckinError::ReferenceMissing => "REFERENCE_MISSING",
            CheckinError::ReferenceUnusable => "REFERENCE_UNUSABLE",
            CheckinError::NoMatch { .. } => "NO_MATCH",
            CheckinError::TokenInvalid => "TOKEN_INVALID",
            CheckinError::TokenExpired => "TOKEN_EXPIRED",
            CheckinError::AlreadyUsed => "ALREADY_USED",
            CheckinError::NotAuthenticated => "NOT_AUTHENTICATED",
            CheckinError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            CheckinError::Internal(_) => "INTERNAL",
        }
    }

    /// What the kiosk screen shows the student.
    pub fn user_message(&self) -> &'static str {
        match self {
            CheckinError::ResourceUnavailable {
                resource: Resource::Models,
                ..
            } => "Face recognition could not start. Try again or contact support.",
            CheckinError::ResourceUnavailable {
                resource: Resource::Camera,
                ..
            } => "Camera unavailable. Check that it is connected and allowed, then try again.",
            CheckinError::NoFaceDetected => {
                "No face detected. Center your face in the frame and try again."
            }
            CheckinError::AmbiguousFaces { .. } => {
                "More than one face is in view. Make sure only you are in the frame."
            }
            CheckinError::ReferenceMissing => "Enrollment photo not found. Contact administration.",
            CheckinError::ReferenceUnusable => {
                "Your enrollment photo could not be processed. Contact administration."
            }
            CheckinError::NoMatch { .. } => "Face not recognized. Try again.",
            CheckinError::TokenInvalid => {
                "Check-in code not recognized. Scan the classroom code again."
            }
            CheckinError::TokenExpired => {
                "This check-in code has expired. Ask for a refreshed code."
            }
            CheckinError::AlreadyUsed => "Attendance already recorded for this class.",
            CheckinError::NotAuthenticated => "No student is signed in.",
            CheckinError::PersistenceFailed(_) => "Your check-in could not be saved. Try again.",
            CheckinError::Internal(_) => "Something went wrong. Try again.",
        }
    }

    /// Whether another attempt from the live screen can still succeed.
    ///
    /// A failed persist is retryable because the matched record is kept and
    /// only the write is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckinError::NoFaceDetected
                | CheckinError::AmbiguousFaces { .. }
                | CheckinError::NoMatch { .. }
                | CheckinError::PersistenceFailed(_)
        )
    }
}

impl From<AcquireError> for CheckinError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Models(source) => CheckinError::ResourceUnavailable {
                resource: Resource::Models,
                source,
            },
            AcquireError::Camera(source) => CheckinError::ResourceUnavailable {
                resource: Resource::Camera,
                source,
            },
        }
    }
}

/// Live-capture mapping. The reference-portrait path maps the same errors
/// differently (see [`crate::reference`]).
impl From<EngineError> for CheckinError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoFace => CheckinError::NoFaceDetected,
            EngineError::Ambiguous { count } => CheckinError::AmbiguousFaces { count },
            other => CheckinError::Internal(anyhow::Error::new(other)),
        }
    }
}
