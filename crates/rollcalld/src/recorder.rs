//! Attendance recording: provenance assembly and the insert-once write.

use crate::error::{CheckinError, StoreError};
use crate::ports::{Datastore, GeoLookup};
use crate::provenance;
use crate::types::{AttendanceRecord, AttendanceToken, Identity};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Assemble a record for a confirmed match.
///
/// Geolocation is consulted here, once per record; an unavailable lookup
/// writes "Unknown" for both location and IP rather than failing the
/// check-in.
pub async fn build_record<G: GeoLookup>(
    geo: &G,
    identity: &Identity,
    token: &AttendanceToken,
    user_agent: &str,
    now: DateTime<Utc>,
) -> AttendanceRecord {
    let (location, ip) = match geo.lookup().await {
        Some(info) => {
            let location = provenance::format_location(&info);
            (location, info.ip)
        }
        None => ("Unknown".to_string(), "Unknown".to_string()),
    };

    AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        student_email: identity.email.clone(),
        class_session: token.class_session.clone(),
        recorded_at: now,
        location,
        ip,
        device: provenance::device_class(user_agent),
        browser: provenance::browser_family(user_agent),
        user_agent: user_agent.to_string(),
        token: token.token.clone(),
    }
}

/// Write the record.
///
/// A duplicate-token violation surfaces as the benign
/// [`CheckinError::AlreadyUsed`]; any other write failure is
/// [`CheckinError::PersistenceFailed`], which the caller may retry with the
/// same record. On success the staged token slot is cleared.
pub async fn persist<D: Datastore>(
    store: &D,
    record: &AttendanceRecord,
) -> Result<(), CheckinError> {
    match store.insert_attendance(record).await {
        Ok(()) => {
            if let Err(e) = store.clear_staged_token().await {
                tracing::warn!(error = %e, "staged token not cleared after successful record");
            }
            tracing::info!(
                id = %record.id,
                class_session = %record.class_session,
                device = record.device.as_str(),
                browser = record.browser.as_str(),
                "attendance recorded"
            );
            Ok(())
        }
        Err(StoreError::DuplicateToken) => Err(CheckinError::AlreadyUsed),
        Err(e) => Err(CheckinError::PersistenceFailed(anyhow::Error::new(e))),
    }
}
