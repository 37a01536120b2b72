//! Files submitted for processing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted upload (100 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Video container extensions the backend accepts.
const ACCEPTED_EXTENSIONS: &[&str] = &["mov", "mpeg", "mp4", "mpg", "avi", "wmv", "mpegps", "flv"];

/// Why a file was rejected before submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("unsupported file type: {0:?}")]
    UnsupportedType(String),
}

/// Options chosen at submission time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Mix background music into the output
    #[serde(default)]
    pub add_bg_music: bool,
}

/// A file ready to upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original file name (without directories)
    pub name: String,
    /// MIME type sent with the transfer
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Build from a name and contents, deriving the content type from the
    /// extension.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let content_type = content_type_for(&name).to_string();
        Self {
            name,
            content_type,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lower-cased extension, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name).map(|e| e.to_ascii_lowercase())
    }

    /// Check type and size limits.
    pub fn validate(&self) -> Result<(), UploadError> {
        match self.extension() {
            Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => {}
            Some(ext) => return Err(UploadError::UnsupportedType(ext)),
            None => return Err(UploadError::UnsupportedType(self.name.clone())),
        }

        if self.bytes.is_empty() {
            return Err(UploadError::Empty);
        }

        if self.size() > MAX_UPLOAD_BYTES {
            return Err(UploadError::TooLarge {
                size: self.size(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        Ok(())
    }
}

fn extension_of(name: &str) -> Option<&str> {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rfind('.') {
        Some(0) | None => None,
        Some(dot) => Some(&file[dot + 1..]),
    }
}

/// MIME type for a video file name.
pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("mpegps") => "video/MP2P",
        Some("avi") => "video/x-msvideo",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        _ => "application/octet-stream",
    }
}
