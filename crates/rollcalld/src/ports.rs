//! Trait seams for the daemon's external collaborators.
//!
//! Production wires SQLite, HTTP clients and the camera engine behind these;
//! the flow tests substitute scripted fakes.

use crate::error::{AcquireError, EngineError, FetchError, StoreError};
use crate::types::{AttendanceRecord, AttendanceToken, GeoInfo, Identity, ReferenceRecord};
use rollcall_core::Descriptor;

/// Source of the authenticated student at this kiosk.
pub trait IdentityProvider {
    /// `None` means nobody is signed in; check-in refuses to run.
    async fn current_user(&self) -> Result<Option<Identity>, StoreError>;
}

/// Durable reads and writes the check-in flow needs.
pub trait Datastore {
    /// Enrollment lookup. Inactive students resolve to `None`.
    async fn reference_by_email(&self, email: &str)
        -> Result<Option<ReferenceRecord>, StoreError>;

    /// Unconditional token fetch; expiry is judged by the caller.
    async fn token_by_id(&self, token: &str) -> Result<Option<AttendanceToken>, StoreError>;

    /// Insert-once write. A second insert for the same token must fail with
    /// [`StoreError::DuplicateToken`].
    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    async fn recent_attendance(
        &self,
        email: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Single-slot token handoff between the scan step and the check-in
    /// screen. Staging overwrites any previous slot content.
    async fn stage_token(&self, token: &str) -> Result<(), StoreError>;

    /// Peek at the staged token without consuming it.
    async fn staged_token(&self) -> Result<Option<String>, StoreError>;

    /// Empty the slot; called once a record is durably written.
    async fn clear_staged_token(&self) -> Result<(), StoreError>;
}

/// Downloads enrollment portrait bytes.
pub trait ImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Best-effort IP geolocation. Failures come back as `None`, never an error.
pub trait GeoLookup {
    async fn lookup(&self) -> Option<GeoInfo>;
}

/// A running per-session descriptor engine: loaded models plus an open
/// camera.
pub trait DescriptorEngine {
    /// Capture one fresh frame and extract the single-face descriptor.
    /// Frames are never reused between attempts.
    async fn probe_descriptor(&self) -> Result<Descriptor, EngineError>;

    /// Decode an encoded image (the enrollment portrait) and extract its
    /// descriptor.
    async fn image_descriptor(&self, bytes: Vec<u8>) -> Result<Descriptor, EngineError>;
}

/// Brings a [`DescriptorEngine`] up, models first and camera second.
/// Dropping the returned engine releases both.
pub trait ResourceAcquirer {
    type Engine: DescriptorEngine;

    async fn acquire(&self) -> Result<Self::Engine, AcquireError>;
}
