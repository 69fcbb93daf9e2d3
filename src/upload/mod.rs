//! Upload validation
//!
//! User-supplied files are checked against a media type and size policy before
//! they can enter the classification pipeline. Validation never decodes the
//! image and never runs inference; decoding happens when classification is
//! requested.

use crate::error::{ErrorKind, ValidationReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest accepted upload: 10 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Limits applied to uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// Files strictly larger than this are rejected
    pub max_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

/// A file as delivered by the file picker.
#[derive(Clone)]
pub struct UploadedFile {
    pub name: Option<String>,
    /// Declared media type, e.g. `image/jpeg`
    pub media_type: String,
    /// Declared size in bytes
    pub size: u64,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: None,
            media_type: media_type.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Read a file from disk. The media type is guessed from the extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let media_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let bytes = std::fs::read(path)?;
        debug!(
            "Read {} ({}, {} bytes)",
            path.display(),
            media_type,
            bytes.len()
        );

        let mut file = Self::new(media_type, bytes);
        file.name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(file)
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.size)
            .finish()
    }
}

/// A file that passed validation.
///
/// Cloning shares the bytes. Each validated upload gets a fresh id, so an
/// image can be told apart from the one it replaced.
#[derive(Clone)]
pub struct UploadedImage {
    id: u64,
    name: Option<String>,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl UploadedImage {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        self.bytes.clone()
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Checks uploads against an [`UploadPolicy`].
#[derive(Debug, Clone, Default)]
pub struct UploadValidator {
    policy: UploadPolicy,
}

impl UploadValidator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Accept or reject a file. The media type is checked before the size.
    pub fn validate(&self, file: UploadedFile) -> Result<UploadedImage, ErrorKind> {
        if !file.media_type.to_ascii_lowercase().starts_with("image/") {
            warn!("Rejected upload {:?}: not an image", file);
            return Err(ErrorKind::ValidationFailed(ValidationReason::NotAnImage));
        }
        if file.size > self.policy.max_bytes {
            warn!(
                "Rejected upload {:?}: larger than {} bytes",
                file, self.policy.max_bytes
            );
            return Err(ErrorKind::ValidationFailed(ValidationReason::TooLarge));
        }

        let image = UploadedImage {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            name: file.name,
            media_type: file.media_type,
            bytes: Arc::from(file.bytes),
        };
        debug!("Accepted upload {:?}", image);
        Ok(image)
    }
}
