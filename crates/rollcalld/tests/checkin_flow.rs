//! End-to-end check-in scenarios over scripted fakes.
//!
//! The real SQLite store runs in memory; camera, models, portrait download
//! and geolocation are replaced with counting fakes so the tests can pin
//! down exactly how often each resource is touched.

use chrono::{Duration, Utc};
use rollcall_core::{Descriptor, DESCRIPTOR_DIM, MATCH_THRESHOLD};
use rollcalld::error::{
    AcquireError, CheckinError, EngineError, FetchError, Resource, StoreError,
};
use rollcalld::ports::{
    Datastore, DescriptorEngine, GeoLookup, IdentityProvider, ImageFetcher, ResourceAcquirer,
};
use rollcalld::session::{CheckinFlow, CheckinState};
use rollcalld::store::SqliteStore;
use rollcalld::types::{
    AttendanceRecord, AttendanceToken, BrowserFamily, DeviceClass, GeoInfo, Identity,
    ReferenceRecord,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DESKTOP_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
const MOBILE_UA: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36";

fn reference_descriptor() -> Descriptor {
    Descriptor::from_raw(vec![0.1; DESCRIPTOR_DIM]).unwrap()
}

fn matching_probe() -> Descriptor {
    Descriptor::from_raw(vec![0.1; DESCRIPTOR_DIM]).unwrap()
}

fn far_probe() -> Descriptor {
    let mut values = vec![0.1; DESCRIPTOR_DIM];
    values[0] = 3.0;
    Descriptor::from_raw(values).unwrap()
}

#[derive(Clone)]
struct FakeIdentities(Option<Identity>);

impl IdentityProvider for FakeIdentities {
    async fn current_user(&self) -> Result<Option<Identity>, StoreError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
struct FakeFetcher {
    calls: Arc<AtomicUsize>,
}

impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"portrait-bytes".to_vec())
    }
}

#[derive(Clone)]
struct FakeGeo(Option<GeoInfo>);

impl GeoLookup for FakeGeo {
    async fn lookup(&self) -> Option<GeoInfo> {
        self.0.clone()
    }
}

#[derive(Clone, Copy)]
enum AcquireFailure {
    Models,
    Camera,
}

#[derive(Clone, Debug)]
struct Counters {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
    portraits: Arc<AtomicUsize>,
}

impl Counters {
    fn new() -> Self {
        Self {
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            probes: Arc::new(AtomicUsize::new(0)),
            portraits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

type ProbeScript = Arc<Mutex<VecDeque<Result<Descriptor, EngineError>>>>;

#[derive(Debug)]
struct FakeEngine {
    reference: Descriptor,
    probe_script: ProbeScript,
    portrait_fails: bool,
    counters: Counters,
}

impl DescriptorEngine for FakeEngine {
    async fn probe_descriptor(&self) -> Result<Descriptor, EngineError> {
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        self.probe_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(EngineError::NoFace))
    }

    async fn image_descriptor(&self, _bytes: Vec<u8>) -> Result<Descriptor, EngineError> {
        self.counters.portraits.fetch_add(1, Ordering::SeqCst);
        if self.portrait_fails {
            Err(EngineError::NoFace)
        } else {
            Ok(self.reference.clone())
        }
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct FakeAcquirer {
    reference: Descriptor,
    probe_script: ProbeScript,
    portrait_fails: bool,
    failure: Option<AcquireFailure>,
    counters: Counters,
}

impl ResourceAcquirer for FakeAcquirer {
    type Engine = FakeEngine;

    async fn acquire(&self) -> Result<FakeEngine, AcquireError> {
        match self.failure {
            Some(AcquireFailure::Models) => {
                return Err(AcquireError::Models(anyhow::anyhow!("model file missing")))
            }
            Some(AcquireFailure::Camera) => {
                return Err(AcquireError::Camera(anyhow::anyhow!("device busy")))
            }
            None => {}
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeEngine {
            reference: self.reference.clone(),
            probe_script: self.probe_script.clone(),
            portrait_fails: self.portrait_fails,
            counters: self.counters.clone(),
        })
    }
}

/// Store wrapper that fails the next `failures_left` attendance inserts.
#[derive(Clone)]
struct FailingStore {
    inner: SqliteStore,
    failures_left: Arc<AtomicUsize>,
}

impl Datastore for FailingStore {
    async fn reference_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ReferenceRecord>, StoreError> {
        self.inner.reference_by_email(email).await
    }

    async fn token_by_id(&self, token: &str) -> Result<Option<AttendanceToken>, StoreError> {
        self.inner.token_by_id(token).await
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Database(tokio_rusqlite::Error::ConnectionClosed));
        }
        self.inner.insert_attendance(record).await
    }

    async fn recent_attendance(
        &self,
        email: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.inner.recent_attendance(email, limit).await
    }

    async fn stage_token(&self, token: &str) -> Result<(), StoreError> {
        self.inner.stage_token(token).await
    }

    async fn staged_token(&self) -> Result<Option<String>, StoreError> {
        self.inner.staged_token().await
    }

    async fn clear_staged_token(&self) -> Result<(), StoreError> {
        self.inner.clear_staged_token().await
    }
}

struct Harness {
    flow: CheckinFlow<FakeIdentities, SqliteStore, FakeFetcher, FakeGeo, FakeAcquirer>,
    store: SqliteStore,
    counters: Counters,
    fetch_calls: Arc<AtomicUsize>,
    probe_script: ProbeScript,
}

impl Harness {
    fn push_probe(&self, result: Result<Descriptor, EngineError>) {
        self.probe_script.lock().unwrap().push_back(result);
    }

    fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    fn probes(&self) -> usize {
        self.counters.probes.load(Ordering::SeqCst)
    }

    fn portraits(&self) -> usize {
        self.counters.portraits.load(Ordering::SeqCst)
    }

    fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    async fn rows(&self) -> Vec<AttendanceRecord> {
        self.store
            .recent_attendance("ana@campus.edu", 50)
            .await
            .unwrap()
    }
}

/// Signed-in enrolled student, a valid staged token, working geolocation.
async fn harness() -> Harness {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store
        .upsert_student(
            "ana@campus.edu",
            "S-1042",
            "https://cdn.campus.edu/portraits/ana.jpg",
            true,
        )
        .await
        .unwrap();
    store
        .insert_token("QR-123", "algorithms-0800", Utc::now() + Duration::minutes(5))
        .await
        .unwrap();
    store.stage_token("QR-123").await.unwrap();

    let counters = Counters::new();
    let fetch_calls = Arc::new(AtomicUsize::new(0));
    let probe_script: ProbeScript = Arc::new(Mutex::new(VecDeque::new()));

    let flow = CheckinFlow {
        identities: FakeIdentities(Some(Identity {
            student_id: "S-1042".into(),
            email: "ana@campus.edu".into(),
        })),
        store: store.clone(),
        fetcher: FakeFetcher {
            calls: fetch_calls.clone(),
        },
        geo: FakeGeo(Some(GeoInfo {
            ip: "203.0.113.9".into(),
            city: "Campinas".into(),
            region_code: "SP".into(),
            country_name: "Brazil".into(),
        })),
        acquirer: FakeAcquirer {
            reference: reference_descriptor(),
            probe_script: probe_script.clone(),
            portrait_fails: false,
            failure: None,
            counters: counters.clone(),
        },
    };

    Harness {
        flow,
        store,
        counters,
        fetch_calls,
        probe_script,
    }
}

#[tokio::test]
async fn happy_path_records_and_releases() {
    let h = harness().await;
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    assert_eq!(session.state().name(), "camera-ready");
    assert_eq!(h.acquired(), 1);
    assert_eq!(h.fetch_count(), 1);
    assert_eq!(h.portraits(), 1);
    assert_eq!(h.released(), 0);

    let record = h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(record.student_email, "ana@campus.edu");
    assert_eq!(record.class_session, "algorithms-0800");
    assert_eq!(record.token, "QR-123");
    assert_eq!(record.device, DeviceClass::Desktop);
    assert_eq!(record.browser, BrowserFamily::Chrome);
    assert_eq!(record.location, "Campinas, SP - Brazil");
    assert_eq!(record.ip, "203.0.113.9");

    assert!(matches!(
        session.state(),
        CheckinState::Success { record_id } if *record_id == record.id
    ));
    assert_eq!(h.released(), 1);
    assert_eq!(h.rows().await.len(), 1);
    assert!(h.store.staged_token().await.unwrap().is_none());
}

#[tokio::test]
async fn mobile_user_agent_recorded_as_mobile_chrome() {
    let h = harness().await;
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(MOBILE_UA).await.unwrap();
    let record = h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(record.device, DeviceClass::Mobile);
    assert_eq!(record.browser, BrowserFamily::Chrome);
    assert_eq!(record.user_agent, MOBILE_UA);
}

#[tokio::test]
async fn second_visit_with_same_token_is_already_used() {
    let h = harness().await;
    h.push_probe(Ok(matching_probe()));
    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    h.flow.confirm(&mut session).await.unwrap();

    // The same code scanned again: stage it and start a new visit.
    h.store.stage_token("QR-123").await.unwrap();
    h.push_probe(Ok(matching_probe()));
    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    let err = h.flow.confirm(&mut session).await.unwrap_err();

    assert!(matches!(err, CheckinError::AlreadyUsed));
    assert!(!err.is_retryable());
    assert!(matches!(
        session.state(),
        CheckinState::Failure { kind, .. } if *kind == "ALREADY_USED"
    ));
    assert_eq!(h.rows().await.len(), 1, "no second row for the same token");
    assert_eq!(h.released(), 2);
}

#[tokio::test]
async fn expired_token_fails_before_hardware_is_touched() {
    let h = harness().await;
    h.store
        .insert_token("QR-123", "algorithms-0800", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(err, CheckinError::TokenExpired));
    assert_eq!(h.acquired(), 0);
    assert_eq!(h.fetch_count(), 0);
    assert_eq!(h.rows().await.len(), 0);
}

#[tokio::test]
async fn unknown_staged_token_is_invalid() {
    let h = harness().await;
    h.store.stage_token("QR-ghost").await.unwrap();

    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(err, CheckinError::TokenInvalid));
    assert_eq!(h.acquired(), 0);
}

#[tokio::test]
async fn empty_token_slot_is_invalid() {
    let h = harness().await;
    h.store.clear_staged_token().await.unwrap();

    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(err, CheckinError::TokenInvalid));
    assert_eq!(h.acquired(), 0);
}

#[tokio::test]
async fn signed_out_kiosk_refuses_to_start() {
    let mut h = harness().await;
    h.flow.identities = FakeIdentities(None);

    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(err, CheckinError::NotAuthenticated));
    assert_eq!(h.acquired(), 0);
}

#[tokio::test]
async fn no_face_retries_with_cached_reference() {
    let h = harness().await;
    h.push_probe(Err(EngineError::NoFace));
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    let err = h.flow.confirm(&mut session).await.unwrap_err();
    assert!(matches!(err, CheckinError::NoFaceDetected));
    assert!(err.is_retryable());
    assert_eq!(session.state().name(), "camera-ready");
    assert_eq!(h.released(), 0, "camera survives a retryable failure");

    h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(h.probes(), 2, "each attempt captures a fresh frame");
    assert_eq!(h.fetch_count(), 1, "reference resolved once per visit");
    assert_eq!(h.portraits(), 1);
    assert_eq!(h.rows().await.len(), 1);
    assert_eq!(h.released(), 1);
}

#[tokio::test]
async fn ambiguous_frame_is_retryable() {
    let h = harness().await;
    h.push_probe(Err(EngineError::Ambiguous { count: 2 }));
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    let err = h.flow.confirm(&mut session).await.unwrap_err();
    assert!(matches!(err, CheckinError::AmbiguousFaces { count: 2 }));
    assert!(err.is_retryable());

    h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(h.rows().await.len(), 1);
}

#[tokio::test]
async fn mismatch_reports_distance_and_allows_retry() {
    let h = harness().await;
    h.push_probe(Ok(far_probe()));
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    let err = h.flow.confirm(&mut session).await.unwrap_err();
    match &err {
        CheckinError::NoMatch { distance } => assert!(*distance > MATCH_THRESHOLD),
        other => panic!("expected NoMatch, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(session.state().name(), "camera-ready");
    assert_eq!(h.rows().await.len(), 0);

    h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(h.rows().await.len(), 1);
}

#[tokio::test]
async fn geolocation_outage_degrades_to_unknown() {
    let mut h = harness().await;
    h.flow.geo = FakeGeo(None);
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    let record = h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(record.location, "Unknown");
    assert_eq!(record.ip, "Unknown");
    assert_eq!(h.rows().await.len(), 1, "missing location never blocks check-in");
}

#[tokio::test]
async fn missing_enrollment_is_terminal_and_releases() {
    let h = harness().await;
    // Deactivated students are treated exactly like missing ones.
    h.store
        .upsert_student(
            "ana@campus.edu",
            "S-1042",
            "https://cdn.campus.edu/portraits/ana.jpg",
            false,
        )
        .await
        .unwrap();

    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(err, CheckinError::ReferenceMissing));
    assert_eq!(
        err.user_message(),
        "Enrollment photo not found. Contact administration."
    );
    assert_eq!(h.acquired(), 1);
    assert_eq!(h.released(), 1, "engine must not leak past a failed begin");
}

#[tokio::test]
async fn unusable_portrait_is_terminal() {
    let mut h = harness().await;
    h.flow.acquirer.portrait_fails = true;

    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(err, CheckinError::ReferenceUnusable));
    assert!(!err.is_retryable());
    assert_eq!(h.released(), 1);
}

#[tokio::test]
async fn model_and_camera_failures_stay_distinguishable() {
    let mut h = harness().await;
    h.flow.acquirer.failure = Some(AcquireFailure::Camera);
    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(
        err,
        CheckinError::ResourceUnavailable {
            resource: Resource::Camera,
            ..
        }
    ));

    let mut h = harness().await;
    h.flow.acquirer.failure = Some(AcquireFailure::Models);
    let err = h.flow.begin(DESKTOP_UA).await.unwrap_err();
    assert!(matches!(
        err,
        CheckinError::ResourceUnavailable {
            resource: Resource::Models,
            ..
        }
    ));
}

#[tokio::test]
async fn failed_write_retries_recording_without_rematching() {
    let h = harness().await;
    let flow = CheckinFlow {
        identities: h.flow.identities.clone(),
        store: FailingStore {
            inner: h.store.clone(),
            failures_left: Arc::new(AtomicUsize::new(1)),
        },
        fetcher: h.flow.fetcher.clone(),
        geo: h.flow.geo.clone(),
        acquirer: h.flow.acquirer.clone(),
    };
    h.push_probe(Ok(matching_probe()));

    let mut session = flow.begin(DESKTOP_UA).await.unwrap();
    let err = flow.confirm(&mut session).await.unwrap_err();
    assert!(matches!(err, CheckinError::PersistenceFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(session.state().name(), "camera-ready");
    assert_eq!(h.released(), 0);
    assert_eq!(h.probes(), 1);
    assert_eq!(h.rows().await.len(), 0);

    // The retry writes the already-built record; no new capture or match.
    let record = flow.confirm(&mut session).await.unwrap();
    assert_eq!(h.probes(), 1);
    let rows = h.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, record.id);
    assert_eq!(h.released(), 1);
    assert!(h.store.staged_token().await.unwrap().is_none());
}

#[tokio::test]
async fn token_expiry_is_enforced_again_at_confirm() {
    let h = harness().await;
    h.push_probe(Ok(matching_probe()));
    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();

    // The token lapses while the student hesitates at the live screen.
    h.store
        .insert_token("QR-123", "algorithms-0800", Utc::now() - Duration::seconds(1))
        .await
        .unwrap();

    let err = h.flow.confirm(&mut session).await.unwrap_err();
    assert!(matches!(err, CheckinError::TokenExpired));
    assert_eq!(h.probes(), 0, "expired token rejected before capture");
    assert_eq!(h.released(), 1);
    assert_eq!(h.rows().await.len(), 0);
}

#[tokio::test]
async fn release_is_idempotent_and_success_blocks_reconfirm() {
    let h = harness().await;
    h.push_probe(Ok(matching_probe()));

    let mut session = h.flow.begin(DESKTOP_UA).await.unwrap();
    h.flow.confirm(&mut session).await.unwrap();
    assert_eq!(h.released(), 1);

    session.release();
    assert_eq!(h.released(), 1, "second release is a no-op");

    let err = h.flow.confirm(&mut session).await.unwrap_err();
    assert!(matches!(err, CheckinError::Internal(_)));
    assert_eq!(h.probes(), 1, "a finished session never captures again");

    drop(session);
    assert_eq!(h.released(), 1);
}

#[tokio::test]
async fn abandoned_visit_releases_on_drop() {
    let h = harness().await;
    let session = h.flow.begin(DESKTOP_UA).await.unwrap();
    assert_eq!(h.released(), 0);

    drop(session);
    assert_eq!(h.released(), 1);
    assert_eq!(h.rows().await.len(), 0);
    // Only a successful record consumes the staged token.
    assert_eq!(h.store.staged_token().await.unwrap().as_deref(), Some("QR-123"));
}
