//! The check-in state machine.
//!
//! One session is one visit to the check-in screen. The session owns the
//! engine (models plus camera) and the cached reference descriptor; the flow
//! drives it CameraReady → Capturing → Matching → Recording → Success or
//! Failure. Retryable failures return to CameraReady with the reference
//! still cached; every other exit releases the engine.

use crate::error::CheckinError;
use crate::ports::{
    Datastore, DescriptorEngine, GeoLookup, IdentityProvider, ImageFetcher, ResourceAcquirer,
};
use crate::recorder;
use crate::reference;
use crate::token;
use crate::types::{AttendanceRecord, Identity};
use chrono::Utc;
use rollcall_core::{compare, Descriptor};

/// Observable state of a check-in session.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckinState {
    Idle,
    LoadingModels,
    CameraReady,
    Capturing,
    Matching,
    Recording,
    Success { record_id: String },
    Failure { kind: &'static str, message: String },
}

impl CheckinState {
    pub fn name(&self) -> &'static str {
        match self {
            CheckinState::Idle => "idle",
            CheckinState::LoadingModels => "loading-models",
            CheckinState::CameraReady => "camera-ready",
            CheckinState::Capturing => "capturing",
            CheckinState::Matching => "matching",
            CheckinState::Recording => "recording",
            CheckinState::Success { .. } => "success",
            CheckinState::Failure { .. } => "failure",
        }
    }
}

/// A live visit: identity, staged token, engine and the per-visit caches.
#[derive(Debug)]
pub struct CheckinSession<E: DescriptorEngine> {
    state: CheckinState,
    identity: Identity,
    user_agent: String,
    token_id: String,
    engine: Option<E>,
    /// Resolved once per visit; live frames are never cached this way.
    reference: Descriptor,
    /// A fully built record whose write failed. The next confirm retries the
    /// Recording step only, never the capture or the match.
    pending: Option<AttendanceRecord>,
}

impl<E: DescriptorEngine> CheckinSession<E> {
    pub fn state(&self) -> &CheckinState {
        &self.state
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Give the camera and models back. Idempotent; runs on every exit path
    /// and again from `Drop` as a backstop.
    pub fn release(&mut self) {
        if self.engine.take().is_some() {
            tracing::info!(email = %self.identity.email, "session resources released");
        }
    }

    fn engine(&self) -> Result<&E, CheckinError> {
        self.engine
            .as_ref()
            .ok_or_else(|| CheckinError::Internal(anyhow::anyhow!("engine already released")))
    }
}

impl<E: DescriptorEngine> Drop for CheckinSession<E> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wires the collaborators the state machine needs.
pub struct CheckinFlow<I, D, F, G, A> {
    pub identities: I,
    pub store: D,
    pub fetcher: F,
    pub geo: G,
    pub acquirer: A,
}

impl<I, D, F, G, A> CheckinFlow<I, D, F, G, A>
where
    I: IdentityProvider,
    D: Datastore,
    F: ImageFetcher,
    G: GeoLookup,
    A: ResourceAcquirer,
{
    /// Start a visit: authenticate, validate the staged token, bring up
    /// models then camera, resolve and cache the reference descriptor.
    ///
    /// Token problems fail here before any hardware is touched; expiry and
    /// single-use are enforced again when the record is written.
    pub async fn begin(&self, user_agent: &str) -> Result<CheckinSession<A::Engine>, CheckinError> {
        let identity = self
            .identities
            .current_user()
            .await
            .map_err(anyhow::Error::new)?
            .ok_or(CheckinError::NotAuthenticated)?;

        let token_id = self
            .store
            .staged_token()
            .await
            .map_err(anyhow::Error::new)?
            .ok_or(CheckinError::TokenInvalid)?;

        token::validate(&self.store, &token_id, Utc::now())
            .await?
            .require_valid()?;

        tracing::info!(email = %identity.email, "check-in visit starting, loading models");
        let engine = self.acquirer.acquire().await?;

        let reference =
            match reference::resolve(&self.store, &self.fetcher, &engine, &identity).await {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    // Terminal before the session object exists; the engine
                    // must not outlive the failure.
                    drop(engine);
                    return Err(e);
                }
            };

        tracing::info!(email = %identity.email, "camera ready");
        Ok(CheckinSession {
            state: CheckinState::CameraReady,
            identity,
            user_agent: user_agent.to_string(),
            token_id,
            engine: Some(engine),
            reference,
            pending: None,
        })
    }

    /// Run one confirm attempt.
    ///
    /// Ok returns the durably written record and the session ends in
    /// Success. Retryable errors leave the session at CameraReady; terminal
    /// errors move it to Failure. Both terminal outcomes release the engine.
    pub async fn confirm(
        &self,
        session: &mut CheckinSession<A::Engine>,
    ) -> Result<AttendanceRecord, CheckinError> {
        if session.state != CheckinState::CameraReady {
            return Err(CheckinError::Internal(anyhow::anyhow!(
                "confirm while {}",
                session.state.name()
            )));
        }

        let result = self.run_attempt(session).await;
        match &result {
            Ok(record) => {
                session.state = CheckinState::Success {
                    record_id: record.id.clone(),
                };
                session.release();
            }
            Err(e) if e.is_retryable() => {
                tracing::info!(kind = e.kind(), "attempt failed, camera stays ready");
                session.state = CheckinState::CameraReady;
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), "check-in failed");
                session.state = CheckinState::Failure {
                    kind: e.kind(),
                    message: e.user_message().to_string(),
                };
                session.release();
            }
        }
        result
    }

    async fn run_attempt(
        &self,
        session: &mut CheckinSession<A::Engine>,
    ) -> Result<AttendanceRecord, CheckinError> {
        // Recording-only retry after a failed write. The match already
        // happened; re-running it could turn a recorded success into a
        // spurious mismatch.
        if let Some(pending) = session.pending.clone() {
            session.state = CheckinState::Recording;
            recorder::persist(&self.store, &pending).await?;
            session.pending = None;
            return Ok(pending);
        }

        let token = token::validate(&self.store, &session.token_id, Utc::now())
            .await?
            .require_valid()?;

        session.state = CheckinState::Capturing;
        let probe = session.engine()?.probe_descriptor().await?;

        session.state = CheckinState::Matching;
        let outcome = compare(&session.reference, &probe);
        tracing::info!(
            distance = outcome.distance,
            matched = outcome.matched,
            "probe compared against reference"
        );
        if !outcome.matched {
            return Err(CheckinError::NoMatch {
                distance: outcome.distance,
            });
        }

        session.state = CheckinState::Recording;
        let record = recorder::build_record(
            &self.geo,
            &session.identity,
            &token,
            &session.user_agent,
            Utc::now(),
        )
        .await;
        match recorder::persist(&self.store, &record).await {
            Ok(()) => Ok(record),
            Err(e @ CheckinError::PersistenceFailed(_)) => {
                session.pending = Some(record);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(CheckinState::Idle.name(), "idle");
        assert_eq!(CheckinState::LoadingModels.name(), "loading-models");
        assert_eq!(CheckinState::CameraReady.name(), "camera-ready");
        assert_eq!(
            CheckinState::Success {
                record_id: "r".into()
            }
            .name(),
            "success"
        );
        assert_eq!(
            CheckinState::Failure {
                kind: "NO_MATCH",
                message: "Face not recognized. Try again.".into()
            }
            .name(),
            "failure"
        );
    }
}
