//! Frame loop for live detection
//!
//! The scheduler repeatedly grabs the current frame, submits it to the
//! detector, waits for that single result, hands it to the result callback and
//! only then waits for the next display refresh. A new frame is therefore never
//! submitted while a previous detection is outstanding, and results are
//! delivered in the order their detections were issued.
//!
//! The loop is an explicit `loop` guarded by a [`CancelToken`] rather than a
//! callback that reschedules itself. Cancellation is checked at the top of
//! every iteration and again before each result is delivered. An in-flight
//! detection is not interrupted; when it finishes after cancellation its
//! result is dropped. Once [`CancelToken::cancel`] returns, the result
//! callback is guaranteed not to run again.
//!
//! A failed detection stops the loop. It is not retried.

use crate::backends::Detector;
use crate::error::{classify, ErrorKind};
use crate::media::FrameSource;
use crate::types::Prediction;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument};

mod clock;

pub use clock::{IntervalClock, Pacing, RefreshClock, YieldClock};

/// Cooperative cancellation flag shared between a loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<Mutex<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request cancellation. Returns `true` the first time it is called.
    ///
    /// Blocks while a result is being delivered, so no delivery can start or
    /// be in progress once this returns.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        let first = !*cancelled;
        *cancelled = true;
        first
    }

    /// Run `f` unless cancellation has been requested. Cancellation cannot
    /// complete while `f` runs.
    pub fn run_unless_cancelled<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let cancelled = self.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        if *cancelled {
            return None;
        }
        let result = f();
        drop(cancelled);
        Some(result)
    }
}

/// Why a frame loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// The owner cancelled the loop.
    Cancelled { delivered: u64 },
    /// A detection failed. The loop did not retry.
    Failed { error: ErrorKind, delivered: u64 },
}

/// A frame loop running on its own task.
#[derive(Debug)]
pub struct RunningLoop {
    cancel: CancelToken,
    task: JoinHandle<LoopExit>,
}

impl RunningLoop {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the loop. See [`CancelToken::cancel`].
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end. Waits for any in-flight detection.
    pub async fn join(self) -> LoopExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Frame loop task ended abnormally: {}", e);
                LoopExit::Failed {
                    error: ErrorKind::Unknown(e.to_string()),
                    delivered: 0,
                }
            }
        }
    }
}

/// Drives the grab-detect-deliver-wait loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameScheduler {
    pacing: Pacing,
}

impl FrameScheduler {
    pub fn new(pacing: Pacing) -> Self {
        Self { pacing }
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn start<F>(
        &self,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        on_result: F,
    ) -> RunningLoop
    where
        F: FnMut(Vec<Prediction>) + Send + 'static,
    {
        self.start_with_token(source, detector, on_result, CancelToken::new())
    }

    /// Like [`start`](Self::start), but stopped through a token the caller
    /// already shares with other parts of a session.
    pub fn start_with_token<F>(
        &self,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        on_result: F,
        cancel: CancelToken,
    ) -> RunningLoop
    where
        F: FnMut(Vec<Prediction>) + Send + 'static,
    {
        let pacing = self.pacing;
        let token = cancel.clone();
        let task = tokio::spawn(
            async move {
                let mut clock = pacing.clock();
                run_loop(clock.as_mut(), source, detector, on_result, token).await
            }
            .in_current_span(),
        );
        RunningLoop { cancel, task }
    }
}

/// Run the frame loop on the calling task until it is cancelled or a
/// detection fails.
pub async fn run_loop<F>(
    clock: &mut dyn RefreshClock,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    mut on_result: F,
    cancel: CancelToken,
) -> LoopExit
where
    F: FnMut(Vec<Prediction>) + Send,
{
    let mut delivered = 0u64;
    debug!("Frame loop started");

    loop {
        if cancel.is_cancelled() {
            debug!("Frame loop cancelled after {} frame(s)", delivered);
            return LoopExit::Cancelled { delivered };
        }

        if let Some(frame) = source.current_frame() {
            trace!("Submitting frame {} for detection", frame.id);
            let predictions = match detector.detect(&frame).await {
                Ok(predictions) => predictions,
                Err(raw) => {
                    warn!("Detection failed on frame {}: {}", frame.id, raw);
                    let error = match classify(&raw) {
                        ErrorKind::Unknown(_) => ErrorKind::InferenceFailed,
                        kind => kind,
                    };
                    return LoopExit::Failed { error, delivered };
                }
            };

            let count = predictions.len();
            if cancel
                .run_unless_cancelled(|| on_result(predictions))
                .is_none()
            {
                debug!(
                    "Discarding {} prediction(s) for frame {} received after cancellation",
                    count, frame.id
                );
                return LoopExit::Cancelled { delivered };
            }
            delivered += 1;
        } else {
            trace!("No frame available yet");
        }

        clock.next_refresh().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::scripted::ScriptedDetector;
    use crate::error::RawFailure;
    use crate::media::simulated::SimulatedDevices;
    use crate::media::MediaAcquisition;
    use crate::types::{BoundingBox, Resolution, VideoConstraints};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    async fn camera() -> Arc<dyn FrameSource> {
        let devices = Arc::new(SimulatedDevices::granting(Resolution::new(64, 48)));
        let handle = MediaAcquisition::new(devices)
            .acquire(&VideoConstraints::default())
            .await
            .unwrap();
        Arc::new(handle)
    }

    fn box_at(x: f32) -> Prediction {
        Prediction::new("person", 0.9, BoundingBox::new(x, 0.0, 10.0, 10.0))
    }

    async fn wait_for(count: &AtomicUsize, n: usize) {
        while count.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert_eq!(token.run_unless_cancelled(|| 5), Some(5));
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
        assert_eq!(token.run_unless_cancelled(|| 5), None);
    }

    #[tokio::test]
    async fn test_delivers_results_in_issue_order() {
        let detector = Arc::new(ScriptedDetector::new(
            (0..5).map(|i| Ok(vec![box_at(i as f32)])),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        let running = FrameScheduler::new(Pacing::Immediate).start(camera().await, detector.clone(), {
            let seen = seen.clone();
            let count = count.clone();
            move |predictions: Vec<Prediction>| {
                if let Some(first) = predictions.first() {
                    seen.lock().unwrap().push(first.bbox.x);
                }
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        wait_for(&count, 5).await;
        running.cancel();
        let exit = running.join().await;

        assert!(matches!(exit, LoopExit::Cancelled { .. }));
        assert_eq!(&seen.lock().unwrap()[..5], &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(detector.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_result_after_cancel_is_discarded() {
        let (detector, gate) = ScriptedDetector::repeating(vec![box_at(1.0)]).gated();
        let detector = Arc::new(detector);
        let count = Arc::new(AtomicUsize::new(0));

        let running = FrameScheduler::new(Pacing::Immediate).start(camera().await, detector.clone(), {
            let count = count.clone();
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        gate.release_one();
        wait_for(&count, 1).await;
        while detector.calls() < 2 {
            tokio::task::yield_now().await;
        }

        // second detection is in flight; cancel, then let it finish
        running.cancel();
        gate.release_one();
        let exit = running.join().await;

        assert_eq!(exit, LoopExit::Cancelled { delivered: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_stops_loop_without_retry() {
        let detector = Arc::new(ScriptedDetector::new([
            Ok(vec![box_at(1.0)]),
            Err(RawFailure::inference("backend crashed")),
        ]));
        let count = Arc::new(AtomicUsize::new(0));

        let running = FrameScheduler::new(Pacing::Immediate).start(camera().await, detector.clone(), {
            let count = count.clone();
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        let exit = running.join().await;

        assert_eq!(
            exit,
            LoopExit::Failed {
                error: ErrorKind::InferenceFailed,
                delivered: 1
            }
        );
        assert_eq!(detector.calls(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(logs_contain("backend crashed"));
    }

    #[tokio::test]
    async fn test_unrecognized_detect_failure_is_inference_failure() {
        let detector = Arc::new(ScriptedDetector::new([Err(RawFailure::new(
            "RangeError",
            "out of bounds",
        ))]));
        let running =
            FrameScheduler::new(Pacing::Immediate).start(camera().await, detector, |_| {});
        assert_eq!(
            running.join().await,
            LoopExit::Failed {
                error: ErrorKind::InferenceFailed,
                delivered: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_pacing_waits_between_frames() {
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let running = FrameScheduler::new(Pacing::Display { hz: 10.0 }).start(
            camera().await,
            detector.clone(),
            {
                let count = count.clone();
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        running.cancel();
        running.join().await;

        // frames at 0ms, 0ms (first tick is immediate), 100ms and 200ms
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shared_token_stops_loop() {
        let token = CancelToken::new();
        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let running = FrameScheduler::new(Pacing::Immediate).start_with_token(
            camera().await,
            detector,
            |_| {},
            token.clone(),
        );
        tokio::task::yield_now().await;

        token.cancel();
        assert!(running.cancel_token().is_cancelled());
        assert!(matches!(running.join().await, LoopExit::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_no_frame_means_no_detection() {
        struct Blank;
        impl FrameSource for Blank {
            fn current_frame(&self) -> Option<crate::types::Frame> {
                None
            }
        }

        let detector = Arc::new(ScriptedDetector::repeating(Vec::new()));
        let running =
            FrameScheduler::new(Pacing::Immediate).start(Arc::new(Blank), detector.clone(), |_| {});
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        running.cancel();
        running.join().await;
        assert_eq!(detector.calls(), 0);
    }
}
