//! Ingestion: validate, fingerprint, dedup, append.
//!
//! The same logical content submitted any number of times yields one record.
//! The cheap indexed lookup answers most repeats; a miss goes through
//! `Session::append_unique`, which re-checks inside the write transaction so
//! concurrent identical submissions still converge on the first winner.

use crate::database::Session;
use crate::fingerprint::fingerprint;
use crate::interface::{ClipKind, ClipboardRecord, IngestRequest, NewRecord, RelayError};
use tracing::debug;

/// Store `request` unless its fingerprint already exists.
/// Returns the canonical record and whether this call created it.
pub fn ingest(session: &Session, request: IngestRequest) -> Result<(ClipboardRecord, bool), RelayError> {
    let record = prepare(request)?;

    let existing = session
        .find_by_fingerprint(&record.fingerprint)
        .map_err(|e| RelayError::storage("find_by_fingerprint", &record.fingerprint, e))?;
    if let Some(existing) = existing {
        debug!(id = existing.id, fingerprint = %record.fingerprint, "dedup hit");
        return Ok((existing, false));
    }

    let (stored, created) = session
        .append_unique(&record)
        .map_err(|e| RelayError::storage("append", &record.fingerprint, e))?;
    if created {
        debug!(id = stored.id, kind = %stored.kind, "stored new item");
    } else {
        debug!(id = stored.id, fingerprint = %record.fingerprint, "dedup hit after concurrent insert");
    }
    Ok((stored, created))
}

/// Validate the payload and compute its fingerprint.
/// Text keeps its content and drops image bytes; images do the reverse.
fn prepare(request: IngestRequest) -> Result<NewRecord, RelayError> {
    let kind = ClipKind::parse(&request.kind)?;
    let (content, image_data) = match kind {
        ClipKind::Text => (request.content, Vec::new()),
        ClipKind::Image => (String::new(), request.image_data.unwrap_or_default()),
    };
    let fingerprint = fingerprint(kind, &content, &image_data)?;

    Ok(NewRecord {
        kind,
        content,
        device_info: request.device_info,
        image_data,
        fingerprint,
    })
}
