//! Content fingerprints
//!
//! A fingerprint is the lowercase hex SHA-256 of an item's payload. Text is
//! hashed after line-ending normalization so the same snippet copied on
//! Windows, classic Mac and Unix maps to one record.

use crate::interface::{ClipKind, RelayError};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const FINGERPRINT_LEN: usize = 64;

/// Fingerprint a payload of a known kind.
///
/// Images must carry bytes. Empty text is legal and hashes to the digest of "".
pub fn fingerprint(kind: ClipKind, content: &str, image_data: &[u8]) -> Result<String, RelayError> {
    match kind {
        ClipKind::Image => {
            if image_data.is_empty() {
                return Err(RelayError::InvalidPayload("image item has no imageData".to_string()));
            }
            Ok(hex::encode(Sha256::digest(image_data)))
        }
        ClipKind::Text => {
            let normalized = normalize_line_endings(content);
            Ok(hex::encode(Sha256::digest(normalized.as_bytes())))
        }
    }
}

/// Fingerprint a payload whose kind is still a raw wire/column string
pub fn fingerprint_for(kind: &str, content: &str, image_data: &[u8]) -> Result<String, RelayError> {
    fingerprint(ClipKind::parse(kind)?, content, image_data)
}

/// Replace "\r\n" and lone "\r" with "\n"
pub fn normalize_line_endings(text: &str) -> std::borrow::Cow<'_, str> {
    if !text.contains('\r') {
        return std::borrow::Cow::Borrowed(text);
    }
    std::borrow::Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Check a caller-supplied digest: exactly 64 hex characters.
/// Returns the lowercase form used by the index.
pub fn parse_fingerprint(candidate: &str) -> Result<String, RelayError> {
    if candidate.len() != FINGERPRINT_LEN || !candidate.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RelayError::InvalidParameter {
            name: "sha256",
            reason: format!("expected {} hex characters", FINGERPRINT_LEN),
        });
    }
    Ok(candidate.to_ascii_lowercase())
}
