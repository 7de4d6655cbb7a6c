//! D-Bus surface of the check-in daemon.
//!
//! Served as `org.freedesktop.Rollcall1` at `/org/freedesktop/Rollcall1`.
//! Methods return JSON payloads; check-in outcomes (including failures) are
//! part of the payload, while `fdo::Error` is reserved for transport-level
//! problems such as a busy session slot.

use crate::engine::{EngineAcquirer, EngineHandle};
use crate::ports::{Datastore, IdentityProvider};
use crate::provenance::IpApiClient;
use crate::reference::HttpImageFetcher;
use crate::session::{CheckinFlow, CheckinSession, CheckinState};
use crate::store::SqliteStore;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::fdo;
use zbus::interface;

/// The production flow wiring.
pub type KioskFlow =
    CheckinFlow<SqliteStore, SqliteStore, HttpImageFetcher, IpApiClient, EngineAcquirer>;

/// Holds the active session between D-Bus calls.
pub struct SessionSlot {
    session: Option<CheckinSession<EngineHandle>>,
    /// Mirrors the session state and keeps the last outcome visible after
    /// the session itself is gone.
    published: CheckinState,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self {
            session: None,
            published: CheckinState::Idle,
        }
    }

    /// Drop any active session, releasing camera and models.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
        self.published = CheckinState::Idle;
    }

    fn status_json(&self) -> serde_json::Value {
        let mut status = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": self.published.name(),
        });
        match &self.published {
            CheckinState::Success { record_id } => {
                status["record_id"] = json!(record_id);
            }
            CheckinState::Failure { kind, message } => {
                status["kind"] = json!(kind);
                status["message"] = json!(message);
            }
            _ => {}
        }
        status
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CheckinService {
    flow: KioskFlow,
    slot: Arc<Mutex<SessionSlot>>,
}

impl CheckinService {
    pub fn new(flow: KioskFlow, slot: Arc<Mutex<SessionSlot>>) -> Self {
        Self { flow, slot }
    }
}

fn busy() -> fdo::Error {
    fdo::Error::Failed("a check-in attempt is already in progress".to_string())
}

#[interface(name = "org.freedesktop.Rollcall1")]
impl CheckinService {
    /// Start (or restart) a check-in visit.
    ///
    /// A non-empty `token` is staged first, exactly like a code scanned into
    /// the kiosk; an empty one reuses whatever is already staged. Any
    /// previous visit is released before the new one starts.
    async fn start_session(&self, token: &str, user_agent: &str) -> fdo::Result<String> {
        let mut slot = self.slot.try_lock().map_err(|_| busy())?;

        if !token.is_empty() {
            self.flow
                .store
                .stage_token(token)
                .await
                .map_err(|e| fdo::Error::Failed(format!("failed to stage token: {e}")))?;
        }

        if let Some(mut old) = slot.session.take() {
            tracing::info!("discarding previous session");
            old.release();
        }
        slot.published = CheckinState::LoadingModels;

        match self.flow.begin(user_agent).await {
            Ok(session) => {
                slot.published = session.state().clone();
                slot.session = Some(session);
            }
            Err(e) => {
                slot.published = CheckinState::Failure {
                    kind: e.kind(),
                    message: e.user_message().to_string(),
                };
            }
        }
        Ok(slot.status_json().to_string())
    }

    /// Run one confirm attempt against the live camera.
    ///
    /// Returns the outcome as JSON. Rejected with an error only when no
    /// session exists or another attempt is still running.
    async fn confirm(&self) -> fdo::Result<String> {
        let mut slot = self.slot.try_lock().map_err(|_| busy())?;

        let Some(mut session) = slot.session.take() else {
            return Err(fdo::Error::Failed("no active check-in session".to_string()));
        };

        let result = self.flow.confirm(&mut session).await;
        slot.published = session.state().clone();

        let payload = match &result {
            Ok(record) => json!({
                "state": "success",
                "record": record,
            }),
            Err(e) => json!({
                "state": session.state().name(),
                "kind": e.kind(),
                "message": e.user_message(),
                "retryable": e.is_retryable(),
            }),
        };

        // Keep the session only while it can still do something.
        if matches!(session.state(), CheckinState::CameraReady) {
            slot.session = Some(session);
        }

        Ok(payload.to_string())
    }

    /// Abandon the current visit and release the camera. Waits for any
    /// in-flight attempt to finish first.
    async fn cancel(&self) -> fdo::Result<()> {
        let mut slot = self.slot.lock().await;
        slot.shutdown();
        tracing::info!("session cancelled");
        Ok(())
    }

    /// Current state as JSON; reports "processing" while an attempt holds
    /// the session.
    async fn status(&self) -> fdo::Result<String> {
        match self.slot.try_lock() {
            Ok(slot) => Ok(slot.status_json().to_string()),
            Err(_) => Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "state": "processing",
            })
            .to_string()),
        }
    }

    /// Recent attendance rows for the signed-in student, newest first.
    async fn history(&self, limit: u32) -> fdo::Result<String> {
        let identity = self
            .flow
            .identities
            .current_user()
            .await
            .map_err(|e| fdo::Error::Failed(format!("identity lookup failed: {e}")))?
            .ok_or_else(|| fdo::Error::Failed("no student signed in".to_string()))?;

        let limit = if limit == 0 { 20 } else { limit.min(100) };
        let rows = self
            .flow
            .store
            .recent_attendance(&identity.email, limit)
            .await
            .map_err(|e| fdo::Error::Failed(format!("history query failed: {e}")))?;

        serde_json::to_string(&rows)
            .map_err(|e| fdo::Error::Failed(format!("history encoding failed: {e}")))
    }
}
