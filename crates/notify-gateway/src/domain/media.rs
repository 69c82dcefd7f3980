//! Media payload classification and inline decoding.
//!
//! Callers send an image as a remote URL, a `data:image/<type>;base64,` URI or
//! bare base64. Inline forms are size-checked on their encoded length before
//! anything is decoded.

use std::sync::LazyLock;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;
use regex::Regex;

use crate::domain::config::MediaConfig;
use crate::domain::error::SendError;

static DATA_URI_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:image/(\w+);base64,").expect("valid regex"));

static RAW_BASE64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("valid regex"));

/// Standard alphabet, padding optional
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Limits applied while resolving media
#[derive(Debug, Clone)]
pub struct MediaPolicy {
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
}

impl From<&MediaConfig> for MediaPolicy {
    fn from(config: &MediaConfig) -> Self {
        Self {
            max_bytes: config.max_image_bytes,
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        }
    }
}

impl MediaPolicy {
    /// Reject when the decoded size estimate (`encoded * 3 / 4`) is above the
    /// ceiling. Exactly at the ceiling passes.
    fn check_encoded_len(&self, encoded_len: usize) -> Result<(), SendError> {
        let estimate = encoded_len.saturating_mul(3);
        if estimate > self.max_bytes.saturating_mul(4) {
            return Err(SendError::ImageTooLarge {
                size: estimate / 4,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Reject decoded or downloaded bytes above the ceiling
    pub fn check_len(&self, len: usize) -> Result<(), SendError> {
        if len > self.max_bytes {
            return Err(SendError::ImageTooLarge {
                size: len,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Classified media payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaInput {
    /// Must be downloaded before delivery
    Remote(String),
    /// Already decoded
    Inline(ImagePayload),
}

/// Image bytes ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl ImagePayload {
    /// Wrap bytes, sniffing the mime type when none is known
    pub fn new(bytes: Bytes, mime_type: Option<String>) -> Self {
        let mime_type = mime_type.unwrap_or_else(|| sniff_mime(&bytes).to_string());
        Self { bytes, mime_type }
    }
}

impl MediaInput {
    /// Classify and, for inline forms, validate and decode.
    pub fn parse(raw: &str, policy: &MediaPolicy) -> Result<Self, SendError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SendError::InvalidImageFormat("No image was provided".into()));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(MediaInput::Remote(raw.to_string()));
        }

        if raw.starts_with("data:image/") {
            return Self::parse_data_uri(raw, policy);
        }

        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if !RAW_BASE64.is_match(&compact) {
            return Err(SendError::InvalidImageFormat(
                "Image is not valid base64".into(),
            ));
        }
        policy.check_encoded_len(compact.len())?;
        let bytes = decode(&compact)?;
        Ok(MediaInput::Inline(ImagePayload::new(bytes, None)))
    }

    fn parse_data_uri(raw: &str, policy: &MediaPolicy) -> Result<Self, SendError> {
        let captures = DATA_URI_PREFIX.captures(raw).ok_or_else(|| {
            SendError::InvalidImageFormat("Malformed data URI".into())
        })?;
        let subtype = captures[1].to_ascii_lowercase();
        if !policy.allowed_types.iter().any(|t| *t == subtype) {
            return Err(SendError::InvalidImageFormat(format!(
                "Image type '{}' is not allowed",
                subtype
            )));
        }

        let payload: String = raw[captures[0].len()..]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if payload.is_empty() {
            return Err(SendError::InvalidImageFormat("Image data is empty".into()));
        }
        policy.check_encoded_len(payload.len())?;

        let bytes = decode(&payload)?;
        let mime = if subtype == "jpg" { "jpeg".to_string() } else { subtype };
        Ok(MediaInput::Inline(ImagePayload::new(
            bytes,
            Some(format!("image/{}", mime)),
        )))
    }
}

fn decode(encoded: &str) -> Result<Bytes, SendError> {
    LENIENT
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|_| SendError::InvalidImageFormat("Image is not valid base64".into()))
}

/// Best-effort mime type from magic bytes
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}
