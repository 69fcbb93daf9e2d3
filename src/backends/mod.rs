//! Model capability abstraction
//!
//! The detection and classification models are opaque to this crate. Sessions
//! only need two narrow capabilities:
//!
//! - **Detection**: `detect(frame) -> [Prediction]`, called once per frame
//! - **Classification**: `classify(image) -> [LabeledScore]`, called once per image
//!
//! Each capability comes with a loader trait because real models are loaded
//! asynchronously and may be slow or fail to load. Any inference engine can be
//! plugged in by implementing these traits; [`scripted`] provides
//! deterministic implementations for demos and tests.

use crate::error::RawFailure;
use crate::types::{DecodedImage, Frame, LabeledScore, Prediction};
use async_trait::async_trait;
use std::sync::Arc;

pub mod scripted;

/// Runs object detection on live frames.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect objects in a single frame. Boxes are in source-frame pixels.
    async fn detect(&self, frame: &Frame) -> Result<Vec<Prediction>, RawFailure>;
}

/// Runs image classification on a decoded still image.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Classify an image. Scores are returned in the model's own order.
    async fn classify(&self, image: &DecodedImage) -> Result<Vec<LabeledScore>, RawFailure>;
}

/// Loads a detection model.
#[async_trait]
pub trait DetectorLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Detector>, RawFailure>;
}

/// Loads a classification model.
#[async_trait]
pub trait ClassifierLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ImageClassifier>, RawFailure>;
}

/// A model that is already loaded. Loading hands out the same instance.
pub struct Loaded<T: ?Sized>(Arc<T>);

impl Loaded<dyn Detector> {
    pub fn detector(detector: Arc<dyn Detector>) -> Self {
        Self(detector)
    }
}

impl Loaded<dyn ImageClassifier> {
    pub fn classifier(classifier: Arc<dyn ImageClassifier>) -> Self {
        Self(classifier)
    }
}

#[async_trait]
impl DetectorLoader for Loaded<dyn Detector> {
    async fn load(&self) -> Result<Arc<dyn Detector>, RawFailure> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl ClassifierLoader for Loaded<dyn ImageClassifier> {
    async fn load(&self) -> Result<Arc<dyn ImageClassifier>, RawFailure> {
        Ok(self.0.clone())
    }
}
