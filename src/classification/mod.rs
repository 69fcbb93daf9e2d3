//! Single-shot image classification
//!
//! [`ClassificationRunner`] turns a validated upload into a ranked list of
//! labels: it decodes the image off the async executor, obtains the
//! classification model from a [`ClassifierCache`] and issues exactly one
//! classify call. A runner accepts one request at a time; a request made while
//! another is outstanding is ignored rather than queued.
//!
//! Scores are returned in the order the model produced them.

use crate::backends::{ClassifierLoader, ImageClassifier, Loaded};
use crate::error::{classify, ErrorKind, ValidationReason};
use crate::types::{DecodedImage, LabeledScore, Resolution};
use crate::upload::UploadedImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Loads the classification model on first use and keeps it.
///
/// A failed load is not cached; the next request tries again.
pub struct ClassifierCache {
    loader: Arc<dyn ClassifierLoader>,
    model: Mutex<Option<Arc<dyn ImageClassifier>>>,
}

impl ClassifierCache {
    pub fn new(loader: Arc<dyn ClassifierLoader>) -> Self {
        Self {
            loader,
            model: Mutex::new(None),
        }
    }

    /// A cache around a model that is already loaded.
    pub fn preloaded(model: Arc<dyn ImageClassifier>) -> Self {
        Self::new(Arc::new(Loaded::classifier(model)))
    }

    /// The loaded model, loading it if necessary.
    pub async fn get(&self) -> Result<Arc<dyn ImageClassifier>, ErrorKind> {
        let mut model = self.model.lock().await;
        if let Some(loaded) = model.as_ref() {
            return Ok(loaded.clone());
        }

        debug!("Loading classification model");
        let loaded = self.loader.load().await.map_err(|raw| {
            warn!("Classification model failed to load: {}", raw);
            match classify(&raw) {
                ErrorKind::Unknown(_) => ErrorKind::ModelLoadFailed,
                kind => kind,
            }
        })?;
        info!("Classification model loaded");
        *model = Some(loaded.clone());
        Ok(loaded)
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.lock().await.is_some()
    }
}

/// What happened to a classify request.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Scores in model order
    Ranked(Vec<LabeledScore>),
    /// Another request was still outstanding; nothing was done
    Ignored,
}

/// Clears the in-flight flag when a request ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs one classification per request.
#[derive(Debug, Default)]
pub struct ClassificationRunner {
    in_flight: AtomicBool,
}

impl ClassificationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Decode `image`, then classify it with the cached model.
    ///
    /// Fails with `ValidationFailed("decode-failed")` if the bytes are not a
    /// decodable image, `ModelLoadFailed` if the model cannot be loaded and
    /// `InferenceFailed` if the classify call fails.
    pub async fn classify(
        &self,
        image: &UploadedImage,
        models: &ClassifierCache,
    ) -> Result<RunOutcome, ErrorKind> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Classification already running; ignoring request");
            return Ok(RunOutcome::Ignored);
        }
        let _guard = InFlight(&self.in_flight);

        let decoded = decode(image).await?;
        let model = models.get().await?;

        debug!("Classifying image {} ({})", image.id(), decoded.resolution);
        let scores = model.classify(&decoded).await.map_err(|raw| {
            warn!("Classification failed: {}", raw);
            ErrorKind::InferenceFailed
        })?;

        info!("Classified image {} into {} label(s)", image.id(), scores.len());
        Ok(RunOutcome::Ranked(scores))
    }
}

/// Decode an uploaded image to RGB8 on the blocking pool.
pub async fn decode(upload: &UploadedImage) -> Result<DecodedImage, ErrorKind> {
    let bytes = upload.shared_bytes();
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| ErrorKind::Unknown(e.to_string()))?
        .map_err(|e| {
            warn!("Failed to decode image {}: {}", upload.id(), e);
            ErrorKind::ValidationFailed(ValidationReason::DecodeFailed)
        })?;

    let rgb = decoded.to_rgb8();
    Ok(DecodedImage {
        resolution: Resolution::new(rgb.width(), rgb.height()),
        rgb: rgb.into_raw(),
    })
}
