//! Simulated camera platform for demos and tests.
//!
//! [`SimulatedDevices`] grants or denies stream requests according to how it
//! was built, can hold a request open like an unanswered permission prompt, and
//! counts opened streams and stopped tracks so callers can verify that every
//! stream is released.

use super::{MediaDevices, MediaTrack, VideoStream};
use crate::error::RawFailure;
use crate::types::{Frame, Resolution, VideoConstraints};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    open: AtomicUsize,
    stop_calls: AtomicUsize,
}

/// Answers a permission prompt held by [`SimulatedDevices::with_pending_permission`].
#[derive(Clone)]
pub struct PermissionPrompt {
    answer: Arc<Semaphore>,
}

impl PermissionPrompt {
    /// Resolve the pending request as if the user clicked "allow".
    pub fn grant(&self) {
        self.answer.add_permits(1);
    }
}

/// A fake camera platform.
pub struct SimulatedDevices {
    resolution: Resolution,
    request_failure: Option<RawFailure>,
    metadata_failure: Option<RawFailure>,
    prompt: Option<Arc<Semaphore>>,
    counters: Arc<Counters>,
    last_constraints: Mutex<Option<VideoConstraints>>,
}

impl SimulatedDevices {
    /// Grant every request with a camera of the given resolution.
    pub fn granting(resolution: Resolution) -> Self {
        Self {
            resolution,
            request_failure: None,
            metadata_failure: None,
            prompt: None,
            counters: Arc::new(Counters::default()),
            last_constraints: Mutex::new(None),
        }
    }

    /// Fail every request with `failure`.
    pub fn failing(failure: RawFailure) -> Self {
        let mut devices = Self::granting(Resolution::default());
        devices.request_failure = Some(failure);
        devices
    }

    /// Grant the stream but fail while waiting for its metadata.
    pub fn with_metadata_failure(mut self, failure: RawFailure) -> Self {
        self.metadata_failure = Some(failure);
        self
    }

    /// Hold each request until the returned prompt is answered.
    pub fn with_pending_permission(mut self) -> (Self, PermissionPrompt) {
        let answer = Arc::new(Semaphore::new(0));
        self.prompt = Some(answer.clone());
        (self, PermissionPrompt { answer })
    }

    /// Streams granted so far.
    pub fn streams_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Streams granted and not yet stopped.
    pub fn open_streams(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Total calls to `stop` across all tracks, repeated calls included.
    pub fn track_stop_calls(&self) -> usize {
        self.counters.stop_calls.load(Ordering::SeqCst)
    }

    /// Constraints of the most recent request.
    pub fn last_constraints(&self) -> Option<VideoConstraints> {
        self.last_constraints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn request_video_stream(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn VideoStream>, RawFailure> {
        *self
            .last_constraints
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(constraints.clone());

        if let Some(prompt) = &self.prompt {
            prompt
                .acquire()
                .await
                .map_err(|_| RawFailure::new("AbortError", "permission prompt dismissed"))?
                .forget();
        }
        if let Some(failure) = &self.request_failure {
            return Err(failure.clone());
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedCamera::new(
            self.resolution,
            self.metadata_failure.clone(),
            self.counters.clone(),
        )))
    }
}

struct SimulatedTrack {
    stopped: AtomicBool,
    counters: Arc<Counters>,
}

impl MediaTrack for SimulatedTrack {
    fn stop(&self) {
        self.counters.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A granted simulated stream with a single video track.
///
/// Every frame has the same blank pixels and a fresh id.
pub struct SimulatedCamera {
    resolution: Resolution,
    metadata_failure: Option<RawFailure>,
    track: Arc<SimulatedTrack>,
    next_frame_id: AtomicU64,
    pixels: Arc<[u8]>,
}

impl SimulatedCamera {
    fn new(
        resolution: Resolution,
        metadata_failure: Option<RawFailure>,
        counters: Arc<Counters>,
    ) -> Self {
        let len = resolution.width as usize * resolution.height as usize * 4;
        Self {
            resolution,
            metadata_failure,
            track: Arc::new(SimulatedTrack {
                stopped: AtomicBool::new(false),
                counters,
            }),
            next_frame_id: AtomicU64::new(0),
            pixels: Arc::from(vec![0u8; len]),
        }
    }
}

#[async_trait]
impl VideoStream for SimulatedCamera {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        let track: Arc<dyn MediaTrack> = self.track.clone();
        vec![track]
    }

    async fn loaded_metadata(&self) -> Result<Resolution, RawFailure> {
        match &self.metadata_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(self.resolution),
        }
    }

    fn current_frame(&self) -> Option<Frame> {
        if self.track.stopped.load(Ordering::SeqCst) {
            return None;
        }
        Some(Frame {
            id: self.next_frame_id.fetch_add(1, Ordering::SeqCst),
            resolution: self.resolution,
            rgba: self.pixels.clone(),
        })
    }
}
