//! Deterministic model implementations
//!
//! These stand in for a real inference engine in demos and tests. The
//! detector replays a script of per-call outcomes. Both models can hold each
//! call open until it is released through a [`CallGate`], which makes it
//! possible to cancel or restart a session while inference is in flight.

use super::{ClassifierLoader, Detector, DetectorLoader, ImageClassifier};
use crate::error::RawFailure;
use crate::types::{DecodedImage, Frame, LabeledScore, Prediction};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

type DetectOutcome = Result<Vec<Prediction>, RawFailure>;

/// Releases calls held by a gated model.
#[derive(Clone)]
pub struct CallGate {
    permits: Arc<Semaphore>,
}

impl CallGate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let one pending (or the next) call complete.
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }

    /// Let `n` calls complete.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

/// A detector that replays scripted outcomes.
///
/// Once the script is exhausted the fallback outcome is returned for every
/// further call (an empty prediction list unless configured otherwise).
pub struct ScriptedDetector {
    script: Mutex<VecDeque<DetectOutcome>>,
    fallback: DetectOutcome,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(script: impl IntoIterator<Item = DetectOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Ok(Vec::new()),
            gate: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Return `predictions` for every call.
    pub fn repeating(predictions: Vec<Prediction>) -> Self {
        Self::new([]).with_fallback(Ok(predictions))
    }

    pub fn with_fallback(mut self, fallback: DetectOutcome) -> Self {
        self.fallback = fallback;
        self
    }

    /// Hold every detect call until the returned gate releases it.
    pub fn gated(mut self) -> (Self, CallGate) {
        let gate = CallGate::new();
        self.gate = Some(gate.permits.clone());
        (self, gate)
    }

    /// Number of detect calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of detect calls that were outstanding at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> DetectOutcome {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Prediction>, RawFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(RawFailure::inference("detect gate closed"));
                }
            }
        }

        let outcome = self.next_outcome();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// A classifier that always returns the same scores (or the same failure).
pub struct StaticClassifier {
    outcome: Result<Vec<LabeledScore>, RawFailure>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl StaticClassifier {
    pub fn new(scores: Vec<LabeledScore>) -> Self {
        Self {
            outcome: Ok(scores),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(failure: RawFailure) -> Self {
        Self {
            outcome: Err(failure),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Hold every classify call until the returned gate releases it.
    pub fn gated(mut self) -> (Self, CallGate) {
        let gate = CallGate::new();
        self.gate = Some(gate.permits.clone());
        (self, gate)
    }

    /// Number of classify calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for StaticClassifier {
    async fn classify(&self, _image: &DecodedImage) -> Result<Vec<LabeledScore>, RawFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| RawFailure::inference("classify gate closed"))?
                .forget();
        }
        self.outcome.clone()
    }
}

/// A loader that always fails, for exercising model load errors.
pub struct FailingLoader {
    message: String,
}

impl FailingLoader {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl DetectorLoader for FailingLoader {
    async fn load(&self) -> Result<Arc<dyn Detector>, RawFailure> {
        Err(RawFailure::model_load(self.message.clone()))
    }
}

#[async_trait]
impl ClassifierLoader for FailingLoader {
    async fn load(&self) -> Result<Arc<dyn ImageClassifier>, RawFailure> {
        Err(RawFailure::model_load(self.message.clone()))
    }
}
