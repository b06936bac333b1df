//! Purr Relay public interface
//!
//! Records, the error taxonomy and the service trait shared by the HTTP
//! boundary and the binary. Everything here is plain data; serialization
//! happens at the edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload kind of a clipboard record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    Text,
    Image,
}

impl ClipKind {
    /// Value stored in the `kind` column
    pub fn database_type(&self) -> &'static str {
        match self {
            ClipKind::Text => "text",
            ClipKind::Image => "image",
        }
    }

    /// Parse a wire or column value. Unknown kinds are rejected as invalid payloads.
    pub fn parse(value: &str) -> Result<Self, RelayError> {
        match value {
            "text" => Ok(ClipKind::Text),
            "image" => Ok(ClipKind::Image),
            other => Err(RelayError::InvalidPayload(format!(
                "unsupported type '{}', expected 'text' or 'image'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ClipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.database_type())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored clipboard item. Immutable once created, apart from the
/// one-time fingerprint backfill on legacy rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardRecord {
    pub id: i64,
    pub kind: ClipKind,
    /// Text payload; empty for images
    pub content: String,
    pub device_info: String,
    /// Raw image bytes; empty for text
    pub image_data: Vec<u8>,
    /// Lowercase hex SHA-256. `None` on legacy rows awaiting backfill.
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ClipboardRecord {
    /// Project onto the shape callers are allowed to see
    pub fn to_entry(&self) -> ClipboardEntry {
        ClipboardEntry {
            id: self.id,
            content: self.content.clone(),
            device_info: self.device_info.clone(),
            kind: self.kind,
            created_at: self.created_at,
            image_data: match self.kind {
                ClipKind::Image => Some(self.image_data.clone()),
                ClipKind::Text => None,
            },
        }
    }

    pub fn into_entry(self) -> ClipboardEntry {
        let image_data = match self.kind {
            ClipKind::Image => Some(self.image_data),
            ClipKind::Text => None,
        };
        ClipboardEntry {
            id: self.id,
            content: self.content,
            device_info: self.device_info,
            kind: self.kind,
            created_at: self.created_at,
            image_data,
        }
    }
}

/// A record about to be appended (id and timestamp are assigned by the store)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub kind: ClipKind,
    pub content: String,
    pub device_info: String,
    pub image_data: Vec<u8>,
    pub fingerprint: String,
}

/// Public view of a record.
///
/// `imageData` is only present for image records and travels as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardEntry {
    pub id: i64,
    pub content: String,
    pub device_info: String,
    #[serde(rename = "type")]
    pub kind: ClipKind,
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::interface::base64_bytes"
    )]
    pub image_data: Option<Vec<u8>>,
}

/// Incoming item, as submitted by a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub device_info: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, with = "crate::interface::base64_bytes")]
    pub image_data: Option<Vec<u8>>,
}

/// Result of an ingest: the canonical record and whether this call created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub entry: ClipboardEntry,
    pub created: bool,
}

/// Counters reported by a full backfill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub scanned: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Error type for relay operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Missing {0} parameter")]
    MissingParameter(&'static str),
    #[error("Invalid {name} parameter: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Operation cancelled")]
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The operations a device can perform against the relay.
/// `ClipboardRelay` is the production implementation.
#[async_trait::async_trait]
pub trait ClipboardRelayApi: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Store an item unless identical content already exists
    async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, RelayError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Up to one page of items older than `old`, newest first.
    /// Without a cursor, starts from the newest item.
    async fn backward_page(&self, old: Option<String>) -> Result<Vec<ClipboardEntry>, RelayError>;

    /// Every item newer than `new`, oldest first
    async fn forward_page(&self, new: Option<String>) -> Result<Vec<ClipboardEntry>, RelayError>;

    /// Substring search over content and device info, newest first
    async fn search(
        &self,
        query: Option<String>,
        limit: Option<String>,
    ) -> Result<Vec<ClipboardEntry>, RelayError>;

    /// Whether an item with this SHA-256 exists, backfilling legacy rows on the way
    async fn exists(&self, sha256: Option<String>) -> Result<bool, RelayError>;

    /// Split free text into search tokens
    fn split_words(&self, text: &str) -> Vec<String>;

    /// Number of stored items
    async fn item_count(&self) -> Result<u64, RelayError>;
}

impl From<crate::database::DatabaseError> for RelayError {
    fn from(e: crate::database::DatabaseError) -> Self {
        match e {
            crate::database::DatabaseError::Interrupted => RelayError::Cancelled,
            other => RelayError::StorageError(other.to_string()),
        }
    }
}

impl RelayError {
    /// Collapse a storage failure into the public taxonomy, logging it with context.
    /// Interrupted queries surface as `Cancelled` and are not errors of the store.
    pub(crate) fn storage(
        operation: &'static str,
        context: impl std::fmt::Display,
        err: crate::database::DatabaseError,
    ) -> Self {
        match err {
            crate::database::DatabaseError::Interrupted => RelayError::Cancelled,
            other => {
                tracing::error!(operation, context = %context, error = %other, "storage operation failed");
                RelayError::StorageError(other.to_string())
            }
        }
    }

    /// Client mistakes (4xx) as opposed to server-side failures
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::Unauthenticated(_)
                | RelayError::InvalidPayload(_)
                | RelayError::MissingParameter(_)
                | RelayError::InvalidParameter { .. }
                | RelayError::NotFound(_)
        )
    }
}

/// Base64 (standard alphabet) for optional byte payloads in JSON
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) if !s.is_empty() => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(kind: ClipKind) -> ClipboardRecord {
        ClipboardRecord {
            id: 7,
            kind,
            content: "hello".to_string(),
            device_info: "laptop".to_string(),
            image_data: vec![1, 2, 3],
            fingerprint: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_text_entry_never_carries_image_data() {
        let entry = record(ClipKind::Text).to_entry();
        assert_eq!(entry.image_data, None);

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("imageData").is_none());
        assert_eq!(json["type"], "text");
        assert_eq!(json["deviceInfo"], "laptop");
    }

    #[test]
    fn test_image_entry_serializes_base64() {
        let entry = record(ClipKind::Image).into_entry();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["imageData"], "AQID");
        assert_eq!(json["type"], "image");
    }

    #[test]
    fn test_ingest_request_decodes_image() {
        let req: IngestRequest = serde_json::from_str(
            r#"{"content":"","deviceInfo":"phone","type":"image","imageData":"AQID"}"#,
        )
        .unwrap();
        assert_eq!(req.image_data, Some(vec![1, 2, 3]));
        assert_eq!(req.kind, "image");
    }

    #[test]
    fn test_ingest_request_rejects_bad_base64() {
        let result: Result<IngestRequest, _> =
            serde_json::from_str(r#"{"type":"image","imageData":"***"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(ClipKind::parse("text").unwrap(), ClipKind::Text);
        assert_eq!(ClipKind::parse("image").unwrap(), ClipKind::Image);
        assert!(matches!(ClipKind::parse("file"), Err(RelayError::InvalidPayload(_))));
    }
}
