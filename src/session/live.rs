use super::{LiveEvent, LiveState};
use crate::backends::DetectorLoader;
use crate::config::SessionConfig;
use crate::error::{classify, ErrorInfo, ErrorKind};
use crate::media::{FrameSource, MediaAcquisition, MediaHandle};
use crate::overlay::{DrawingSurface, OverlayRenderer};
use crate::scheduler::{CancelToken, FrameScheduler, LoopExit, Pacing};
use crate::types::{Prediction, VideoConstraints};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Shared between the controller, its frame loop and any cancellers.
struct Shared {
    state: watch::Sender<LiveState>,
    token: Mutex<CancelToken>,
    media: Mutex<Option<Arc<MediaHandle>>>,
}

impl Shared {
    fn transition(&self, event: LiveEvent) -> bool {
        self.state.send_if_modified(|state| match state.next(event.clone()) {
            Some(next) => {
                debug!("Live session {:?} -> {:?} on {:?}", state, next, event);
                *state = next;
                true
            }
            None => {
                debug!("Live session ignoring {:?} in {:?}", event, state);
                false
            }
        })
    }

    fn current_token(&self) -> CancelToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace_token(&self) -> CancelToken {
        let token = CancelToken::new();
        let previous = std::mem::replace(
            &mut *self.token.lock().unwrap_or_else(|e| e.into_inner()),
            token.clone(),
        );
        previous.cancel();
        token
    }

    fn store_media(&self, media: Arc<MediaHandle>) {
        *self.media.lock().unwrap_or_else(|e| e.into_inner()) = Some(media);
    }

    fn release_media(&self) {
        let media = self.media.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(media) = media {
            media.release();
        }
    }

    /// Cancel whatever is running, free the camera and go idle.
    fn stop(&self) {
        self.current_token().cancel();
        self.release_media();
        self.transition(LiveEvent::Stop);
    }

    /// End the current attempt with `kind` unless it was already cancelled.
    fn fail(&self, token: &CancelToken, kind: ErrorKind) -> ErrorInfo {
        let info = ErrorInfo::new(kind);
        if token.is_cancelled() {
            debug!("Ignoring failure after cancellation: {}", info);
            return info;
        }
        error!("Live session failed: {}", info);
        token.cancel();
        self.release_media();
        self.transition(LiveEvent::Fail(info.clone()));
        info
    }
}

/// Stops a live session from anywhere, e.g. when the view is left.
///
/// Cancelling while the session is still waiting for camera permission is
/// allowed; a stream granted afterwards is released as soon as it arrives.
#[derive(Clone)]
pub struct LiveCanceller {
    shared: Arc<Shared>,
}

impl LiveCanceller {
    pub fn cancel(&self) {
        info!("Live session cancelled");
        self.shared.stop();
    }
}

/// Controller for continuous detection on a camera feed.
pub struct LiveSession {
    acquisition: MediaAcquisition,
    loader: Arc<dyn DetectorLoader>,
    surface: Arc<Mutex<dyn DrawingSurface>>,
    renderer: OverlayRenderer,
    scheduler: FrameScheduler,
    constraints: VideoConstraints,
    shared: Arc<Shared>,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    pub fn new(
        acquisition: MediaAcquisition,
        loader: Arc<dyn DetectorLoader>,
        surface: Arc<Mutex<dyn DrawingSurface>>,
        config: &SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(LiveState::Idle);
        Self {
            acquisition,
            loader,
            surface,
            renderer: OverlayRenderer::new(config.overlay.clone()),
            scheduler: FrameScheduler::new(config.pacing()),
            constraints: config.constraints.clone(),
            shared: Arc::new(Shared {
                state,
                token: Mutex::new(CancelToken::new()),
                media: Mutex::new(None),
            }),
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the frame loop pacing from the configuration.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.scheduler = FrameScheduler::new(pacing);
        self
    }

    pub fn state(&self) -> LiveState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.shared.state.subscribe()
    }

    pub fn canceller(&self) -> LiveCanceller {
        LiveCanceller {
            shared: self.shared.clone(),
        }
    }

    /// Start (or restart) the session.
    ///
    /// Any previous session is torn down first, including waiting for a
    /// detection it still has in flight. Returns once the frame loop
    /// is running; the state becomes `Active` when the first detection has
    /// been drawn. If the session is cancelled before the loop starts this
    /// returns `Ok` and the session stays idle.
    pub async fn start(&self) -> Result<(), ErrorInfo> {
        let token = self.shared.replace_token();
        self.shared.release_media();

        let mut supervisor = self.supervisor.lock().await;
        if let Some(previous) = supervisor.take() {
            debug!("Waiting for previous frame loop to wind down");
            if let Err(e) = previous.await {
                warn!("Previous frame loop supervisor ended abnormally: {}", e);
            }
        }
        if token.is_cancelled() {
            return Ok(());
        }

        self.shared.transition(LiveEvent::Acquire);
        info!("Starting live session");

        let media = match self.acquisition.acquire(&self.constraints).await {
            Ok(media) => Arc::new(media),
            Err(kind) => return self.abandon(&token, kind),
        };
        self.shared.store_media(media.clone());
        if token.is_cancelled() {
            info!("Session cancelled while acquiring the camera; releasing it");
            media.release();
            return Ok(());
        }

        let detector = match self.loader.load().await {
            Ok(detector) => detector,
            Err(raw) => {
                warn!("Detection model failed to load: {}", raw);
                let kind = match classify(&raw) {
                    ErrorKind::Unknown(_) => ErrorKind::ModelLoadFailed,
                    kind => kind,
                };
                return self.abandon(&token, kind);
            }
        };
        if token.is_cancelled() {
            info!("Session cancelled while loading the model");
            media.release();
            return Ok(());
        }

        {
            let mut surface = self.surface.lock().unwrap_or_else(|e| e.into_inner());
            self.renderer.fit(&mut *surface, media.resolution());
        }

        let source: Arc<dyn FrameSource> = media;
        let running = self.scheduler.start_with_token(
            source,
            detector,
            self.frame_sink(),
            token.clone(),
        );

        let shared = self.shared.clone();
        *supervisor = Some(tokio::spawn(
            async move {
                match running.join().await {
                    LoopExit::Cancelled { delivered } => {
                        debug!("Frame loop stopped after {} frame(s)", delivered);
                    }
                    LoopExit::Failed { error, delivered } => {
                        warn!("Frame loop failed after {} frame(s)", delivered);
                        shared.fail(&token, error);
                    }
                }
            }
            .in_current_span(),
        ));
        Ok(())
    }

    /// End a start attempt that hit `kind`. An attempt that was already
    /// cancelled ends quietly and the session stays idle.
    fn abandon(&self, token: &CancelToken, kind: ErrorKind) -> Result<(), ErrorInfo> {
        if token.is_cancelled() {
            debug!("Start was cancelled before failing with {:?}", kind);
            self.shared.release_media();
            return Ok(());
        }
        Err(self.shared.fail(token, kind))
    }

    /// Stop the session and release the camera.
    ///
    /// A detection still in flight is allowed to finish but its result is
    /// never drawn.
    pub fn stop(&self) {
        info!("Stopping live session");
        self.shared.stop();
    }

    /// Draws each result and reports the first one as the session going live.
    fn frame_sink(&self) -> impl FnMut(Vec<Prediction>) + Send + 'static {
        let shared = self.shared.clone();
        let surface = self.surface.clone();
        let renderer = self.renderer.clone();
        let mut first = true;

        move |predictions| {
            {
                let mut surface = surface.lock().unwrap_or_else(|e| e.into_inner());
                renderer.draw(&mut *surface, &predictions);
            }
            if first {
                first = false;
                shared.transition(LiveEvent::FirstFrame);
                info!("Live session active");
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shared.current_token().cancel();
        self.shared.release_media();
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("state", &self.state())
            .field("acquisition", &self.acquisition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::scripted::{FailingLoader, ScriptedDetector};
    use crate::backends::{Detector, Loaded};
    use crate::error::RawFailure;
    use crate::media::simulated::SimulatedDevices;
    use crate::overlay::DisplayList;
    use crate::types::{BoundingBox, Resolution};
    use tracing_test::traced_test;

    struct Harness {
        devices: Arc<SimulatedDevices>,
        surface: Arc<Mutex<DisplayList>>,
        session: LiveSession,
    }

    fn harness(devices: SimulatedDevices, loader: Arc<dyn DetectorLoader>) -> Harness {
        let devices = Arc::new(devices);
        let surface = Arc::new(Mutex::new(DisplayList::new(Resolution::default())));
        let session = LiveSession::new(
            MediaAcquisition::new(devices.clone()),
            loader,
            surface.clone(),
            &SessionConfig::default(),
        )
        .with_pacing(Pacing::Immediate);
        Harness {
            devices,
            surface,
            session,
        }
    }

    fn loader(detector: Arc<ScriptedDetector>) -> Arc<dyn DetectorLoader> {
        let detector: Arc<dyn Detector> = detector;
        Arc::new(Loaded::detector(detector))
    }

    async fn wait_until(rx: &mut watch::Receiver<LiveState>, wanted: impl Fn(&LiveState) -> bool) {
        rx.wait_for(|s| wanted(s)).await.unwrap();
    }

    #[tokio::test]
    async fn test_surface_is_sized_to_camera() {
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let h = harness(
            SimulatedDevices::granting(Resolution::new(500, 350)),
            loader(detector),
        );
        h.session.start().await.unwrap();
        assert_eq!(
            h.surface.lock().unwrap().size(),
            Resolution::new(500, 350)
        );
        h.session.stop();
    }

    #[tokio::test]
    async fn test_stop_releases_camera_and_goes_idle() {
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let h = harness(
            SimulatedDevices::granting(Resolution::new(64, 48)),
            loader(detector),
        );
        let mut rx = h.session.subscribe();

        h.session.start().await.unwrap();
        wait_until(&mut rx, |s| *s == LiveState::Active).await;
        assert_eq!(h.devices.open_streams(), 1);

        h.session.stop();
        assert_eq!(h.session.state(), LiveState::Idle);
        assert_eq!(h.devices.open_streams(), 0);

        // stopping twice is harmless
        h.session.stop();
        assert_eq!(h.devices.track_stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_restart_tears_down_previous_stream() {
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let h = harness(
            SimulatedDevices::granting(Resolution::new(64, 48)),
            loader(detector),
        );

        h.session.start().await.unwrap();
        h.session.start().await.unwrap();
        assert_eq!(h.devices.streams_opened(), 2);
        assert_eq!(h.devices.open_streams(), 1);

        drop(h.session);
        assert_eq!(h.devices.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_model_load_failure_releases_camera() {
        let h = harness(
            SimulatedDevices::granting(Resolution::new(64, 48)),
            Arc::new(FailingLoader::new("weights missing")),
        );

        let err = h.session.start().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelLoadFailed);
        assert_eq!(h.session.state(), LiveState::Error(err));
        assert_eq!(h.devices.streams_opened(), 1);
        assert_eq!(h.devices.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_inference_failure_surfaces_single_error() {
        let person = Prediction::new("person", 0.9, BoundingBox::new(1.0, 1.0, 5.0, 5.0));
        let detector = Arc::new(ScriptedDetector::new([
            Ok(vec![person]),
            Err(RawFailure::inference("kernel panic in backend")),
        ]));
        let h = harness(
            SimulatedDevices::granting(Resolution::new(64, 48)),
            loader(detector.clone()),
        );
        let mut rx = h.session.subscribe();

        h.session.start().await.unwrap();
        wait_until(&mut rx, |s| s.error().is_some()).await;

        assert_eq!(
            h.session.state(),
            LiveState::Error(ErrorInfo::new(ErrorKind::InferenceFailed))
        );
        assert_eq!(detector.calls(), 2);
        assert_eq!(h.devices.open_streams(), 0);
        // the last good frame stays on screen
        assert_eq!(h.surface.lock().unwrap().visible_boxes(), 1);
    }

    #[tokio::test]
    async fn test_error_then_restart_recovers() {
        let detector = Arc::new(ScriptedDetector::new([Err(RawFailure::inference("oops"))]));
        let h = harness(
            SimulatedDevices::granting(Resolution::new(64, 48)),
            loader(detector),
        );
        let mut rx = h.session.subscribe();

        h.session.start().await.unwrap();
        wait_until(&mut rx, |s| s.error().is_some()).await;

        h.session.start().await.unwrap();
        wait_until(&mut rx, |s| *s == LiveState::Active).await;
        assert!(h.session.state().error().is_none());
        h.session.stop();
    }

    #[tokio::test]
    async fn test_cancel_while_permission_pending_releases_late_stream() {
        let (devices, prompt) =
            SimulatedDevices::granting(Resolution::new(64, 48)).with_pending_permission();
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let h = harness(devices, loader(detector.clone()));
        let canceller = h.session.canceller();

        let session = &h.session;
        let start = async move { session.start().await };
        let cancel_then_grant = async {
            tokio::task::yield_now().await;
            assert_eq!(h.session.state(), LiveState::Acquiring);
            canceller.cancel();
            assert_eq!(h.session.state(), LiveState::Idle);
            prompt.grant();
        };
        let (result, ()) = tokio::join!(start, cancel_then_grant);

        assert!(result.is_ok());
        assert_eq!(h.session.state(), LiveState::Idle);
        assert_eq!(h.devices.streams_opened(), 1);
        assert_eq!(h.devices.open_streams(), 0);
        assert_eq!(detector.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let surface = Arc::new(Mutex::new(DisplayList::new(Resolution::default())));
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let session = LiveSession::new(
            MediaAcquisition::unsupported(),
            loader(detector),
            surface,
            &SessionConfig::default(),
        );

        let err = session.start().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
        assert_eq!(err.message, "Camera access is not supported in your browser");
        assert!(!session.state().is_loading());
    }

    #[tokio::test]
    async fn test_restart_waits_for_in_flight_detection() {
        let (detector, gate) = ScriptedDetector::repeating(Vec::new()).gated();
        let detector = Arc::new(detector);
        let h = harness(
            SimulatedDevices::granting(Resolution::new(64, 48)),
            loader(detector.clone()),
        );

        h.session.start().await.unwrap();
        while detector.calls() < 1 {
            tokio::task::yield_now().await;
        }

        let finish_old_detection = async {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert_eq!(detector.calls(), 1, "new loop started before the old one ended");
            gate.release_one();
        };
        let (restarted, ()) = tokio::join!(h.session.start(), finish_old_detection);
        restarted.unwrap();

        while detector.calls() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(detector.max_in_flight(), 1);
        assert_eq!(h.devices.streams_opened(), 2);
        assert_eq!(h.devices.open_streams(), 1);
        h.session.stop();
    }

    #[tokio::test]
    async fn test_denial_after_cancel_stays_idle() {
        let (devices, prompt) = SimulatedDevices::failing(RawFailure::new(
            "NotAllowedError",
            "Permission denied",
        ))
        .with_pending_permission();
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let h = harness(devices, loader(detector.clone()));
        let canceller = h.session.canceller();

        let cancel_then_deny = async {
            tokio::task::yield_now().await;
            assert_eq!(h.session.state(), LiveState::Acquiring);
            canceller.cancel();
            prompt.grant();
        };
        let (result, ()) = tokio::join!(h.session.start(), cancel_then_deny);

        assert_eq!(result, Ok(()));
        assert_eq!(h.session.state(), LiveState::Idle);
        assert_eq!(h.devices.streams_opened(), 0);
        assert_eq!(detector.calls(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_zero_refresh_rate_uses_default() {
        let devices = Arc::new(SimulatedDevices::granting(Resolution::new(64, 48)));
        let surface = Arc::new(Mutex::new(DisplayList::new(Resolution::default())));
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let session = LiveSession::new(
            MediaAcquisition::new(devices),
            loader(detector.clone()),
            surface,
            &SessionConfig::default().with_refresh_hz(0.0),
        );

        let mut rx = session.subscribe();
        session.start().await.unwrap();
        wait_until(&mut rx, |s| *s == LiveState::Active).await;
        assert!(session.state().error().is_none());
        assert!(detector.calls() >= 1);
        assert!(logs_contain("falling back to 60 Hz"));
        session.stop();
    }
}
