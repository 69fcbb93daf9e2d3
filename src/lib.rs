//! Session lifecycle for in-browser style vision demos: continuous object
//! detection on a camera feed with boxes drawn over the video, and one-shot
//! classification of an uploaded image.

pub mod backends;
pub mod classification;
pub mod config;
mod error;
pub mod media;
pub mod overlay;
pub mod scheduler;
pub mod session;
pub mod types;
pub mod upload;

pub use backends::{ClassifierLoader, Detector, DetectorLoader, ImageClassifier, Loaded};
pub use classification::{ClassificationRunner, ClassifierCache, RunOutcome};
pub use config::SessionConfig;
pub use error::{classify, ConfigError, ErrorInfo, ErrorKind, RawFailure, ValidationReason};
pub use media::{MediaAcquisition, MediaHandle};
pub use overlay::{DisplayList, DrawingSurface, OverlayRenderer, OverlayStyle};
pub use scheduler::{CancelToken, FrameScheduler, LoopExit, Pacing};
pub use session::{
    LiveCanceller, LiveEvent, LiveSession, LiveState, UploadEvent, UploadSession, UploadState,
};
pub use types::{BoundingBox, LabeledScore, Prediction, Resolution};
pub use upload::{UploadValidator, UploadedFile, UploadedImage};
