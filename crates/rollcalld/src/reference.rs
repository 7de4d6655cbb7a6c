//! Enrollment reference resolution.
//!
//! The portrait is looked up by the authenticated identity, fetched over
//! HTTP and pushed through the same descriptor pipeline as live frames.
//! Resolution happens once per visit; the descriptor is then cached on the
//! session and reused by every attempt.

use crate::error::{CheckinError, EngineError, FetchError};
use crate::ports::{Datastore, DescriptorEngine, ImageFetcher};
use crate::types::Identity;
use rollcall_core::Descriptor;
use std::time::Duration;

/// Resolve the enrollment descriptor for `identity`.
///
/// A missing or inactive enrollment row is [`CheckinError::ReferenceMissing`].
/// A portrait that downloads but yields no usable face is
/// [`CheckinError::ReferenceUnusable`]. Both are terminal; retrying cannot
/// help until administration fixes the enrollment data.
pub async fn resolve<D, F, E>(
    store: &D,
    fetcher: &F,
    engine: &E,
    identity: &Identity,
) -> Result<Descriptor, CheckinError>
where
    D: Datastore,
    F: ImageFetcher,
    E: DescriptorEngine,
{
    let record = store
        .reference_by_email(&identity.email)
        .await
        .map_err(anyhow::Error::new)?
        .ok_or(CheckinError::ReferenceMissing)?;

    tracing::debug!(email = %identity.email, url = %record.photo_url, "fetching enrollment portrait");

    let bytes = fetcher
        .fetch(&record.photo_url)
        .await
        .map_err(|e| CheckinError::Internal(anyhow::Error::new(e)))?;

    let descriptor = engine.image_descriptor(bytes).await.map_err(|e| match e {
        EngineError::NoFace | EngineError::Ambiguous { .. } | EngineError::Decode(_) => {
            CheckinError::ReferenceUnusable
        }
        other => CheckinError::Internal(anyhow::Error::new(other)),
    })?;

    tracing::debug!(email = %identity.email, "reference descriptor cached for this visit");
    Ok(descriptor)
}

/// Portrait downloader with a hard deadline per request.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            Ok::<_, FetchError>(response.bytes().await?.to_vec())
        };
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut),
        }
    }
}
