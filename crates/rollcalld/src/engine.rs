//! Per-session descriptor engine on a dedicated OS thread.
//!
//! Inference is blocking CPU work and the camera handle should not hop
//! between threads, so both live on one named thread for the lifetime of a
//! visit. Async callers talk to it through an mpsc request channel with
//! oneshot replies. Dropping the handle closes the channel, which ends the
//! thread and releases camera and models together.

use crate::config::Config;
use crate::error::{AcquireError, EngineError};
use crate::ports::{DescriptorEngine, ResourceAcquirer};
use rollcall_core::{Descriptor, DescriptorPipeline, ExtractError, FacePolicy};
use rollcall_hw::Camera;
use tokio::sync::{mpsc, oneshot};

enum EngineRequest {
    ProbeDescriptor {
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
    ImageDescriptor {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
}

/// Handle to a running engine thread.
///
/// Deliberately not `Clone`: the handle is the release token. Whoever owns
/// it owns the camera, and dropping it is what gives the camera back.
#[derive(Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl DescriptorEngine for EngineHandle {
    async fn probe_descriptor(&self) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ProbeDescriptor { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn image_descriptor(&self, bytes: Vec<u8>) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ImageDescriptor {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Bring up an engine: models first, then the camera.
///
/// The two phases fail with distinct [`AcquireError`] variants so "no
/// recognition runtime" and "no camera" stay distinguishable for the shell.
pub async fn spawn_engine(
    camera_device: String,
    detector_model: String,
    embedder_model: String,
    policy: FacePolicy,
) -> Result<EngineHandle, AcquireError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), AcquireError>>();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            // Models load before the camera opens; a failed load must not
            // hold the device.
            let mut pipeline =
                match DescriptorPipeline::load(&detector_model, &embedder_model, policy) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AcquireError::Models(anyhow::Error::new(e))));
                        return;
                    }
                };

            let camera = match Camera::open(&camera_device) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = ready_tx.send(Err(AcquireError::Camera(anyhow::Error::new(e))));
                    return;
                }
            };

            tracing::info!(
                device = %camera.device_path,
                width = camera.width,
                height = camera.height,
                "engine ready"
            );
            if ready_tx.send(Ok(())).is_err() {
                // Caller went away during startup; camera and models unwind
                // here with the thread.
                return;
            }

            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::ProbeDescriptor { reply } => {
                        let _ = reply.send(run_probe(&camera, &mut pipeline));
                    }
                    EngineRequest::ImageDescriptor { bytes, reply } => {
                        let _ = reply.send(run_image(&mut pipeline, &bytes));
                    }
                }
            }

            tracing::info!(device = %camera.device_path, "engine thread exiting, camera released");
        })
        .expect("failed to spawn engine thread");

    match ready_rx.await {
        Ok(Ok(())) => Ok(EngineHandle { tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AcquireError::Models(anyhow::anyhow!(
            "engine thread terminated during startup"
        ))),
    }
}

fn run_probe(camera: &Camera, pipeline: &mut DescriptorPipeline) -> Result<Descriptor, EngineError> {
    let frame = camera
        .capture_frame()
        .map_err(|e| EngineError::Capture(anyhow::Error::new(e)))?;
    if frame.is_dark {
        // Covered lens or unlit room. Skip detection on such frames.
        tracing::warn!(
            brightness = frame.avg_brightness(),
            "captured frame is dark, treating as no face"
        );
        return Err(EngineError::NoFace);
    }
    pipeline
        .descriptor_from_gray(&frame.data, frame.width, frame.height)
        .map_err(map_extract_error)
}

fn run_image(pipeline: &mut DescriptorPipeline, bytes: &[u8]) -> Result<Descriptor, EngineError> {
    pipeline.descriptor_from_image(bytes).map_err(map_extract_error)
}

fn map_extract_error(err: ExtractError) -> EngineError {
    match err {
        ExtractError::NoFace => EngineError::NoFace,
        ExtractError::Ambiguous { count } => EngineError::Ambiguous { count },
        ExtractError::Image(e) => EngineError::Decode(anyhow::Error::new(e)),
        other => EngineError::Inference(anyhow::Error::new(other)),
    }
}

/// Production acquirer: one engine per visit, wired from the daemon config.
#[derive(Clone)]
pub struct EngineAcquirer {
    camera_device: String,
    detector_model: String,
    embedder_model: String,
    policy: FacePolicy,
}

impl EngineAcquirer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_device: config.camera_device.clone(),
            detector_model: config.detector_model_path().to_string_lossy().into_owned(),
            embedder_model: config.embedder_model_path().to_string_lossy().into_owned(),
            policy: config.face_policy,
        }
    }
}

impl ResourceAcquirer for EngineAcquirer {
    type Engine = EngineHandle;

    async fn acquire(&self) -> Result<EngineHandle, AcquireError> {
        spawn_engine(
            self.camera_device.clone(),
            self.detector_model.clone(),
            self.embedder_model.clone(),
            self.policy,
        )
        .await
    }
}
