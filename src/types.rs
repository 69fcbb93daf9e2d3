//! Common types used throughout the session crate.
//!
//! This module contains the data that flows between the camera, the model
//! capabilities and the overlay: frames, predictions, classification scores and
//! the constraints used to request a camera stream. None of it is persisted;
//! predictions are consumed by the renderer and dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Native resolution of a video source or drawing surface, in pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A resolution with no area. Frames of this size cannot be drawn on.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single frame pulled from a live video source.
///
/// Pixel data is reference counted so that handing a frame to a detector does
/// not copy it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter assigned by the source
    pub id: u64,
    /// Size of the frame in pixels
    pub resolution: Resolution,
    /// Raw RGBA8 pixels, row major
    pub rgba: Arc<[u8]>,
}

/// Location of a detected object in source-frame pixel coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X-coordinate of the top-left corner
    pub x: f32,
    /// Y-coordinate of the top-left corner
    pub y: f32,
    /// Width of the bounding box in pixels
    pub width: f32,
    /// Height of the bounding box in pixels
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One detected object, produced by the detection capability once per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label for the detected object
    pub label: String,
    /// Confidence score for the detection (0.0 to 1.0)
    pub confidence: f32,
    /// Where the object was found
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// One classification label with its confidence.
///
/// Lists of scores keep the order the model returned them in, which is
/// descending confidence for every model this crate has been used with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledScore {
    pub label: String,
    /// Probability for the label (0.0 to 1.0)
    pub confidence: f32,
}

impl LabeledScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Formats as `"<label> <percent>%"` with one decimal, e.g. `cat 87.0%`.
impl fmt::Display for LabeledScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1}%", self.label, self.confidence * 100.0)
    }
}

/// Which camera to ask for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front-facing camera
    #[default]
    User,
    /// Rear camera
    Environment,
}

/// Constraints passed to the platform when requesting a camera stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConstraints {
    pub facing_mode: FacingMode,
    /// Live sessions never record audio; kept so the request mirrors the platform call
    pub audio: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            audio: false,
        }
    }
}

/// A decoded still image handed to the classification capability.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub resolution: Resolution,
    /// RGB8 pixels, row major
    pub rgb: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_display_uses_one_decimal_percent() {
        assert_eq!(LabeledScore::new("cat", 0.87).to_string(), "cat 87.0%");
        assert_eq!(LabeledScore::new("dog", 0.1).to_string(), "dog 10.0%");
        assert_eq!(LabeledScore::new("tabby", 0.12345).to_string(), "tabby 12.3%");
    }

    #[test]
    fn test_prediction_box_field_name() {
        let json = r#"{"label":"person","confidence":0.92,"box":{"x":10,"y":20,"width":100,"height":200}}"#;
        let prediction: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.label, "person");
        assert_eq!(prediction.bbox, BoundingBox::new(10.0, 20.0, 100.0, 200.0));
    }

    #[test]
    fn test_default_constraints_are_front_camera_video_only() {
        let constraints = VideoConstraints::default();
        assert_eq!(constraints.facing_mode, FacingMode::User);
        assert!(!constraints.audio);
    }

    #[test]
    fn test_empty_resolution() {
        assert!(Resolution::new(0, 480).is_empty());
        assert!(!Resolution::new(640, 480).is_empty());
        assert_eq!(Resolution::new(640, 480).to_string(), "640x480");
    }
}
