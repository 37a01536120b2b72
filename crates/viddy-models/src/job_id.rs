//! Job identifiers and backend job handles.
//!
//! A [`JobIdentifier`] names the uploaded artifact and doubles as its storage
//! object key:
//!
//! ```text
//! {base}_{hash}_{uuid}{.ext}
//! ```
//!
//! - `base`: original file stem, sanitized to `[A-Za-z0-9_-]`
//! - `hash`: first 10 hex chars of SHA-256 over `base` + submission time (ms)
//! - `uuid`: random v4 UUID (hyphenated)
//! - `ext`: original extension, alphanumerics only

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Length of the hash segment.
pub const HASH_LEN: usize = 10;

/// Base name used when the original name sanitizes to nothing.
const FALLBACK_BASE: &str = "upload";

/// Extensions accepted when relabeling a downloaded artifact.
const DOWNLOAD_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "wmv", "flv", "webm", "mkv", "m4v"];

/// Extension used for downloads when the original one is unknown.
const DEFAULT_DOWNLOAD_EXTENSION: &str = "mp4";

/// Collision-resistant name for one submitted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobIdentifier(pub String);

/// The `{base, extension}` pair recovered from a [`JobIdentifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJobName {
    pub base: String,
    pub extension: Option<String>,
}

impl JobIdentifier {
    /// Generate an identifier for `original_name` submitted at `salt`.
    pub fn generate(original_name: &str, salt: DateTime<Utc>) -> Self {
        let (stem, extension) = split_extension(original_name);
        let base = sanitize_base(stem);
        let hash = short_hash(&base, salt);
        let uuid = Uuid::new_v4();

        let mut id = format!("{}_{}_{}", base, hash, uuid);
        if let Some(ext) = extension.map(sanitize_extension).filter(|e| !e.is_empty()) {
            id.push('.');
            id.push_str(&ext);
        }
        Self(id)
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the sanitized base name and extension.
    ///
    /// Returns `None` when the identifier was not produced by
    /// [`JobIdentifier::generate`].
    pub fn parse(&self) -> Option<ParsedJobName> {
        let (stem, extension) = match self.0.rfind('.') {
            Some(dot) => (&self.0[..dot], Some(self.0[dot + 1..].to_string())),
            None => (self.0.as_str(), None),
        };

        let mut parts = stem.rsplitn(3, '_');
        let uuid = parts.next()?;
        let hash = parts.next()?;
        let base = parts.next()?;

        if base.is_empty() || hash.len() != HASH_LEN || Uuid::parse_str(uuid).is_err() {
            return None;
        }

        Some(ParsedJobName {
            base: base.to_string(),
            extension,
        })
    }

    /// File name to save the described artifact under.
    ///
    /// `clip_3f9a…_….mov` becomes `clip_with_audio_desc.mov`; unknown or
    /// missing extensions fall back to `mp4`.
    pub fn download_file_name(&self) -> String {
        let (base, ext) = match self.parse() {
            Some(parsed) => {
                let ext = parsed
                    .extension
                    .map(|e| e.to_ascii_lowercase())
                    .filter(|e| DOWNLOAD_EXTENSIONS.contains(&e.as_str()))
                    .unwrap_or_else(|| DEFAULT_DOWNLOAD_EXTENSION.to_string());
                (parsed.base, ext)
            }
            None => ("video".to_string(), DEFAULT_DOWNLOAD_EXTENSION.to_string()),
        };
        format!("{}_with_audio_desc.{}", base, ext)
    }
}

impl fmt::Display for JobIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle returned by the backend when processing starts.
///
/// Usually an echo (or a derivative) of the [`JobIdentifier`]; it is the key
/// used for status polling and download links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&JobIdentifier> for JobHandle {
    fn from(id: &JobIdentifier) -> Self {
        Self(id.0.clone())
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split `name` into stem and extension at the last dot.
///
/// Leading dots (hidden files) are part of the stem.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    // Only the final path component matters.
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(dot) => (&name[..dot], Some(&name[dot + 1..])),
    }
}

fn sanitize_base(stem: &str) -> String {
    let sanitized: String = stem
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if sanitized.chars().all(|c| c == '-' || c == '_') {
        FALLBACK_BASE.to_string()
    } else {
        sanitized
    }
}

fn sanitize_extension(ext: &str) -> String {
    ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn short_hash(base: &str, salt: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{}{}", base, salt.timestamp_millis()).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..HASH_LEN].to_string()
}
