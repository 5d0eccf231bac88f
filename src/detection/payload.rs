use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{DetectionError, Result};

/// Image as submitted by a caller: raw encoded bytes (file upload, camera frame)
/// or a base64 string, optionally wrapped in a `data:image/...;base64,` URL.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    Bytes(Vec<u8>),
    Base64(String),
}

impl ImagePayload {
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let bytes = match self {
            ImagePayload::Bytes(bytes) => bytes,
            ImagePayload::Base64(encoded) => decode_base64(&encoded)?,
        };
        if bytes.is_empty() {
            return Err(DetectionError::EmptyImage);
        }
        Ok(bytes)
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let trimmed = encoded.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => trimmed,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}
