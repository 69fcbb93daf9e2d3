use super::{UploadEvent, UploadState};
use crate::backends::ClassifierLoader;
use crate::classification::{ClassificationRunner, ClassifierCache, RunOutcome};
use crate::config::SessionConfig;
use crate::error::{ErrorInfo, ErrorKind};
use crate::upload::{UploadValidator, UploadedFile, UploadedImage};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shown for any failure after the image was accepted, other than decoding.
const CLASSIFY_FAILED: &str = "Failed to classify image. Please try again.";

/// Controller for classifying a single uploaded image.
pub struct UploadSession {
    validator: UploadValidator,
    runner: ClassificationRunner,
    models: ClassifierCache,
    state: watch::Sender<UploadState>,
    image: Mutex<Option<UploadedImage>>,
}

impl UploadSession {
    pub fn new(loader: Arc<dyn ClassifierLoader>, config: &SessionConfig) -> Self {
        let (state, _) = watch::channel(UploadState::Idle);
        Self {
            validator: UploadValidator::new(config.upload.clone()),
            runner: ClassificationRunner::new(),
            models: ClassifierCache::new(loader),
            state,
            image: Mutex::new(None),
        }
    }

    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    /// The image that classify would run on.
    pub fn current_image(&self) -> Option<UploadedImage> {
        self.image().clone()
    }

    /// Validate a newly picked file and make it the current image.
    ///
    /// A rejected file clears any previous image and puts the session in the
    /// error state. Either way a classification still running for an earlier
    /// file will not report its result.
    pub fn select_file(&self, file: UploadedFile) -> Result<(), ErrorInfo> {
        match self.validator.validate(file) {
            Ok(image) => {
                info!("Selected image {}", image.id());
                *self.image() = Some(image);
                self.transition(UploadEvent::FileAccepted);
                Ok(())
            }
            Err(kind) => {
                *self.image() = None;
                let info = ErrorInfo::new(kind);
                self.transition(UploadEvent::FileRejected(info.clone()));
                Err(info)
            }
        }
    }

    /// Classify the current image.
    ///
    /// Returns [`RunOutcome::Ignored`] when there is no image or a
    /// classification is already running. A result that arrives after a new
    /// file was selected is returned to the caller but not published, since
    /// the session has left `Classifying` by then.
    pub async fn classify(&self) -> Result<RunOutcome, ErrorInfo> {
        let Some(image) = self.image().clone() else {
            debug!("No image selected; ignoring classify request");
            return Ok(RunOutcome::Ignored);
        };
        if self.runner.is_running() || !self.transition(UploadEvent::ClassifyStarted) {
            debug!("Classify request ignored in {:?}", self.state());
            return Ok(RunOutcome::Ignored);
        }

        match self.runner.classify(&image, &self.models).await {
            Ok(RunOutcome::Ranked(scores)) => {
                if !self.transition(UploadEvent::Classified(scores.clone())) {
                    debug!("Discarding result for replaced image {}", image.id());
                }
                Ok(RunOutcome::Ranked(scores))
            }
            Ok(RunOutcome::Ignored) => Ok(RunOutcome::Ignored),
            Err(kind) => {
                let info = match kind {
                    ErrorKind::ModelLoadFailed | ErrorKind::InferenceFailed => {
                        ErrorInfo::with_message(kind, CLASSIFY_FAILED)
                    }
                    kind => ErrorInfo::new(kind),
                };
                if self.transition(UploadEvent::ClassifyFailed(info.clone())) {
                    error!("Classification of image {} failed: {}", image.id(), info);
                } else {
                    debug!("Discarding failure for replaced image {}", image.id());
                }
                Err(info)
            }
        }
    }

    fn image(&self) -> std::sync::MutexGuard<'_, Option<UploadedImage>> {
        self.image.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, event: UploadEvent) -> bool {
        self.state.send_if_modified(|state| match state.next(event) {
            Some(next) => {
                debug!("Upload session -> {:?}", next);
                *state = next;
                true
            }
            None => false,
        })
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("state", &self.state())
            .field("image", &self.current_image())
            .finish()
    }
}
