//! Session controllers
//!
//! A controller owns one mode's lifecycle and is the only thing the
//! presentation layer observes. Its state lives in a `tokio::sync::watch`
//! channel and is changed only by feeding events through the pure transition
//! functions below; an event that is not valid in the current state leaves the
//! state untouched. This keeps a late inference result from overriding a
//! cancellation or a newer upload.
//!
//! Live mode:
//!
//! ```text
//! Idle --Acquire--> Acquiring --FirstFrame--> Active --Stop--> Idle
//!            any of Acquiring/Active --Fail--> Error --Acquire--> Acquiring
//! ```
//!
//! Upload mode:
//!
//! ```text
//! any --FileAccepted--> Validated --ClassifyStarted--> Classifying --Classified--> Done
//! any --FileRejected--> Error      Classifying --ClassifyFailed--> Error
//! ```

use crate::error::ErrorInfo;
use crate::types::LabeledScore;
use serde::Serialize;

mod live;
mod upload;

pub use live::{LiveCanceller, LiveSession};
pub use upload::UploadSession;

/// State of a live detection session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum LiveState {
    Idle,
    /// Waiting for the camera, the model or the first detection
    Acquiring,
    /// Frames are being detected and drawn
    Active,
    Error(ErrorInfo),
}

/// Something that happened to a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Acquire,
    FirstFrame,
    Stop,
    Fail(ErrorInfo),
}

impl LiveState {
    /// The state after `event`, or `None` if the event does not apply.
    pub fn next(&self, event: LiveEvent) -> Option<LiveState> {
        use LiveState::*;
        match (self, event) {
            (_, LiveEvent::Acquire) => Some(Acquiring),
            (Acquiring, LiveEvent::FirstFrame) => Some(Active),
            (Acquiring | Active, LiveEvent::Stop) => Some(Idle),
            (Acquiring | Active | Error(_), LiveEvent::Fail(info)) => Some(Error(info)),
            _ => None,
        }
    }

    /// Whether the loading indicator should be shown.
    pub fn is_loading(&self) -> bool {
        matches!(self, LiveState::Acquiring)
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            LiveState::Error(info) => Some(info),
            _ => None,
        }
    }
}

/// State of an upload session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    /// A valid image is selected and ready to classify
    Validated,
    Classifying,
    /// Scores in the order the model returned them
    Done(Vec<LabeledScore>),
    Error(ErrorInfo),
}

/// Something that happened to an upload session.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    FileAccepted,
    FileRejected(ErrorInfo),
    ClassifyStarted,
    Classified(Vec<LabeledScore>),
    ClassifyFailed(ErrorInfo),
}

impl UploadState {
    /// The state after `event`, or `None` if the event does not apply.
    pub fn next(&self, event: UploadEvent) -> Option<UploadState> {
        use UploadState::*;
        match (self, event) {
            (_, UploadEvent::FileAccepted) => Some(Validated),
            (_, UploadEvent::FileRejected(info)) => Some(Error(info)),
            (Validated | Done(_) | Error(_), UploadEvent::ClassifyStarted) => Some(Classifying),
            (Classifying, UploadEvent::Classified(scores)) => Some(Done(scores)),
            (Classifying, UploadEvent::ClassifyFailed(info)) => Some(Error(info)),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, UploadState::Classifying)
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            UploadState::Error(info) => Some(info),
            _ => None,
        }
    }

    /// Result lines as displayed, e.g. `["cat 87.0%", "dog 10.0%"]`.
    pub fn result_lines(&self) -> Vec<String> {
        match self {
            UploadState::Done(scores) => scores.iter().map(|s| s.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ValidationReason};

    fn denied() -> ErrorInfo {
        ErrorInfo::new(ErrorKind::PermissionDenied)
    }

    #[test]
    fn test_live_happy_path() {
        let state = LiveState::Idle;
        let state = state.next(LiveEvent::Acquire).unwrap();
        assert!(state.is_loading());
        let state = state.next(LiveEvent::FirstFrame).unwrap();
        assert_eq!(state, LiveState::Active);
        assert_eq!(state.next(LiveEvent::FirstFrame), None);
        assert_eq!(state.next(LiveEvent::Stop), Some(LiveState::Idle));
    }

    #[test]
    fn test_live_error_exits_only_by_restart() {
        let state = LiveState::Acquiring.next(LiveEvent::Fail(denied())).unwrap();
        assert_eq!(state.error(), Some(&denied()));
        assert_eq!(state.next(LiveEvent::Stop), None);
        assert_eq!(state.next(LiveEvent::FirstFrame), None);
        assert_eq!(state.next(LiveEvent::Acquire), Some(LiveState::Acquiring));
    }

    #[test]
    fn test_live_idle_ignores_late_events() {
        assert_eq!(LiveState::Idle.next(LiveEvent::FirstFrame), None);
        assert_eq!(LiveState::Idle.next(LiveEvent::Fail(denied())), None);
        assert_eq!(LiveState::Idle.next(LiveEvent::Stop), None);
    }

    #[test]
    fn test_upload_transitions() {
        let scores = vec![LabeledScore::new("cat", 0.87)];
        let state = UploadState::Idle;
        assert_eq!(state.next(UploadEvent::ClassifyStarted), None);

        let state = state.next(UploadEvent::FileAccepted).unwrap();
        let state = state.next(UploadEvent::ClassifyStarted).unwrap();
        assert!(state.is_loading());
        assert_eq!(state.next(UploadEvent::ClassifyStarted), None);

        let done = state.next(UploadEvent::Classified(scores.clone())).unwrap();
        assert_eq!(done.result_lines(), vec!["cat 87.0%"]);
        assert_eq!(
            done.next(UploadEvent::Classified(scores)),
            None,
            "results only land while classifying"
        );
    }

    #[test]
    fn test_new_file_resets_from_any_state() {
        let rejected = ErrorInfo::new(ErrorKind::ValidationFailed(ValidationReason::TooLarge));
        for state in [
            UploadState::Idle,
            UploadState::Validated,
            UploadState::Classifying,
            UploadState::Done(Vec::new()),
            UploadState::Error(rejected.clone()),
        ] {
            assert_eq!(
                state.next(UploadEvent::FileAccepted),
                Some(UploadState::Validated)
            );
            assert_eq!(
                state.next(UploadEvent::FileRejected(rejected.clone())),
                Some(UploadState::Error(rejected.clone()))
            );
        }
    }
}
