//! Session configuration.
//!
//! A [`SessionConfig`] collects everything that is fixed for the lifetime of a
//! session: the camera constraints, the overlay style, the upload policy and
//! the display refresh rate the frame loop is paced to. Every field has a
//! default, so a partial JSON document is a valid configuration.

use crate::error::ConfigError;
use crate::overlay::OverlayStyle;
use crate::scheduler::Pacing;
use crate::types::VideoConstraints;
use crate::upload::UploadPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Refresh rate used when none is configured.
pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub constraints: VideoConstraints,
    pub overlay: OverlayStyle,
    pub upload: UploadPolicy,
    /// Display refresh rate in Hz
    pub refresh_hz: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            constraints: VideoConstraints::default(),
            overlay: OverlayStyle::default(),
            upload: UploadPolicy::default(),
            refresh_hz: DEFAULT_REFRESH_HZ,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON and check its values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_constraints(mut self, constraints: VideoConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_overlay(mut self, overlay: OverlayStyle) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_upload(mut self, upload: UploadPolicy) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_refresh_hz(mut self, refresh_hz: f64) -> Self {
        self.refresh_hz = refresh_hz;
        self
    }

    /// Frame loop pacing for the configured refresh rate.
    pub fn pacing(&self) -> Pacing {
        Pacing::Display {
            hz: self.refresh_hz,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.refresh_hz.is_finite() || self.refresh_hz <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "refresh_hz must be a positive number, got {}",
                self.refresh_hz
            )));
        }
        if self.overlay.font_px <= 0.0 || self.overlay.line_width < 0.0 {
            return Err(ConfigError::InvalidValue(
                "overlay font_px must be positive and line_width non-negative".to_string(),
            ));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "upload max_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
