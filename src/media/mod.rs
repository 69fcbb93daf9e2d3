//! Camera acquisition
//!
//! [`MediaAcquisition`] requests a video-only camera stream from the platform
//! and hands back a [`MediaHandle`] once the stream's metadata (its native
//! resolution) is known. Drawing against a stream before that point produces
//! zero-sized frames, so acquisition does not succeed until the metadata
//! arrives.
//!
//! The handle owns the stream's tracks. Releasing it stops every track; doing
//! so twice is a no-op, and dropping the handle releases it, so the camera is
//! freed on every exit path including errors and cancellation.

use crate::error::{classify, ErrorKind, RawFailure};
use crate::types::{Frame, Resolution, VideoConstraints};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod simulated;

/// One track of a camera stream.
pub trait MediaTrack: Send + Sync {
    /// Stop the track and free the underlying hardware.
    fn stop(&self);
}

/// A granted camera stream.
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// Every track that makes up the stream.
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Resolves once the stream knows its native resolution.
    async fn loaded_metadata(&self) -> Result<Resolution, RawFailure>;

    /// The frame currently presented by the stream, if any.
    fn current_frame(&self) -> Option<Frame>;
}

/// The platform's camera capability.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Ask for a camera stream. May wait indefinitely on a permission prompt.
    async fn request_video_stream(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn VideoStream>, RawFailure>;
}

/// Anything the frame loop can pull frames from.
pub trait FrameSource: Send + Sync {
    fn current_frame(&self) -> Option<Frame>;
}

/// Exclusive ownership of a live camera stream.
pub struct MediaHandle {
    stream: Box<dyn VideoStream>,
    resolution: Resolution,
    released: AtomicBool,
}

impl MediaHandle {
    fn new(stream: Box<dyn VideoStream>) -> Self {
        Self {
            stream,
            resolution: Resolution::default(),
            released: AtomicBool::new(false),
        }
    }

    /// Native resolution reported by the stream metadata.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stop every track of the stream.
    ///
    /// Returns `true` if this call released the stream and `false` if it had
    /// already been released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        let tracks = self.stream.tracks();
        debug!("Stopping {} camera track(s)", tracks.len());
        for track in tracks {
            track.stop();
        }
        info!("Camera stream released");
        true
    }
}

impl FrameSource for MediaHandle {
    fn current_frame(&self) -> Option<Frame> {
        if self.is_released() {
            return None;
        }
        self.stream.current_frame()
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("resolution", &self.resolution)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Requests camera streams from the platform.
#[derive(Clone)]
pub struct MediaAcquisition {
    devices: Option<Arc<dyn MediaDevices>>,
}

impl MediaAcquisition {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices: Some(devices),
        }
    }

    /// Acquisition on a platform with no camera capability. Every request
    /// fails with [`ErrorKind::Unsupported`].
    pub fn unsupported() -> Self {
        Self { devices: None }
    }

    /// Request a stream and wait until its metadata is available.
    ///
    /// If the metadata never becomes available the stream is released before
    /// the error is returned.
    pub async fn acquire(&self, constraints: &VideoConstraints) -> Result<MediaHandle, ErrorKind> {
        let devices = self.devices.as_ref().ok_or_else(|| {
            warn!("No camera capability on this platform");
            ErrorKind::Unsupported
        })?;

        debug!("Requesting camera stream: {:?}", constraints);
        let stream = devices
            .request_video_stream(constraints)
            .await
            .map_err(|raw| {
                warn!("Camera request failed: {}", raw);
                classify(&raw)
            })?;

        let mut handle = MediaHandle::new(stream);
        let resolution = handle.stream.loaded_metadata().await.map_err(|raw| {
            warn!("Camera metadata failed to load: {}", raw);
            classify(&raw)
        })?;
        if resolution.is_empty() {
            warn!("Camera reported an empty resolution {}", resolution);
            return Err(ErrorKind::Unknown(format!(
                "Camera reported an empty resolution {resolution}"
            )));
        }

        handle.resolution = resolution;
        info!("Camera stream ready at {}", resolution);
        Ok(handle)
    }
}

impl std::fmt::Debug for MediaAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAcquisition")
            .field("supported", &self.devices.is_some())
            .finish()
    }
}
