//! Webcam snapshot decoding.
//!
//! Browsers send snapshots as base64 strings, usually with a
//! `data:image/png;base64,` prefix. Both failure modes here are client
//! errors, never pipeline crashes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image bytes: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a base64-encoded snapshot into an RGB image.
///
/// A data-URI header (everything up to and including the first comma) is
/// stripped before decoding.
pub fn decode_base64_image(payload: &str) -> Result<RgbImage, SnapshotError> {
    let encoded = match payload.split_once(',') {
        Some((_header, body)) => body,
        None => payload,
    };

    let bytes = BASE64.decode(encoded.trim())?;
    let decoded = image::load_from_memory(&bytes)?;
    Ok(decoded.to_rgb8())
}
