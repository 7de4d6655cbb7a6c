//! Two-step validation of classroom check-in tokens.

use crate::error::CheckinError;
use crate::ports::Datastore;
use crate::types::AttendanceToken;
use chrono::{DateTime, Utc};

/// Outcome of validating a token string.
#[derive(Debug, Clone)]
pub enum TokenStatus {
    Valid(AttendanceToken),
    /// No row for this token string.
    NotFound,
    /// The row exists but its deadline has passed.
    Expired(AttendanceToken),
}

impl TokenStatus {
    /// Collapse into the flow's error taxonomy.
    pub fn require_valid(self) -> Result<AttendanceToken, CheckinError> {
        match self {
            TokenStatus::Valid(token) => Ok(token),
            TokenStatus::NotFound => Err(CheckinError::TokenInvalid),
            TokenStatus::Expired(_) => Err(CheckinError::TokenExpired),
        }
    }
}

/// Fetch the token unconditionally, then judge expiry against `now`.
///
/// The lookup never filters on expiry; that is what keeps "unknown code" and
/// "expired code" distinguishable. A token is valid through its deadline
/// inclusive: `now <= expires_at`.
pub async fn validate<D: Datastore>(
    store: &D,
    token: &str,
    now: DateTime<Utc>,
) -> Result<TokenStatus, CheckinError> {
    let Some(row) = store.token_by_id(token).await.map_err(anyhow::Error::new)? else {
        return Ok(TokenStatus::NotFound);
    };
    if now <= row.expires_at {
        Ok(TokenStatus::Valid(row))
    } else {
        tracing::debug!(token = %row.token, expires_at = %row.expires_at, "token expired");
        Ok(TokenStatus::Expired(row))
    }
}
