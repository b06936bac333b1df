//! Sync and query operations
//!
//! Devices page through history with id cursors: `old` walks backwards from
//! the newest item in fixed windows, `new` returns everything after the last
//! id a device has seen. Ids, never timestamps, order every result.

use crate::database::Session;
use crate::fingerprint::{fingerprint, parse_fingerprint};
use crate::interface::{BackfillReport, ClipboardEntry, ClipboardRecord, RelayError};
use std::num::IntErrorKind;
use tracing::{debug, info, warn};

pub const DEFAULT_BACKWARD_PAGE_SIZE: usize = 10;
pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const MAX_SEARCH_LIMIT: usize = 200;

/// Window sizes for the paged reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub backward_page_size: usize,
    /// `None` keeps the forward page unbounded
    pub forward_page_cap: Option<usize>,
    pub search_default_limit: usize,
    pub search_max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            backward_page_size: DEFAULT_BACKWARD_PAGE_SIZE,
            forward_page_cap: None,
            search_default_limit: DEFAULT_SEARCH_LIMIT,
            search_max_limit: MAX_SEARCH_LIMIT,
        }
    }
}

/// Parse an id cursor. Any non-negative integer is accepted; values past
/// the store's id range behave like "after everything".
pub fn parse_cursor(name: &'static str, raw: &str) -> Result<i64, RelayError> {
    let value: u64 = raw.trim().parse().map_err(|_| RelayError::InvalidParameter {
        name,
        reason: format!("'{}' is not a non-negative integer", raw),
    })?;
    Ok(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Resolve the `limit` parameter of a search against the configured bounds
pub fn parse_search_limit(raw: Option<&str>, limits: &PageLimits) -> Result<usize, RelayError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(limits.search_default_limit.clamp(1, limits.search_max_limit)),
        Some(raw) => raw,
    };
    let max = limits.search_max_limit.max(1);
    let requested: i64 = match raw.parse::<i64>() {
        Ok(value) => value,
        // Integers too large for i64 clamp like any other out-of-range value
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => return Ok(max),
        Err(e) if *e.kind() == IntErrorKind::NegOverflow => return Ok(1),
        Err(_) => {
            return Err(RelayError::InvalidParameter {
                name: "limit",
                reason: format!("'{}' is not an integer", raw),
            })
        }
    };
    Ok(requested.clamp(1, max as i64) as usize)
}

fn entries(records: Vec<ClipboardRecord>) -> Vec<ClipboardEntry> {
    records.into_iter().map(ClipboardRecord::into_entry).collect()
}

/// Items strictly older than `old`, newest first, one page at most.
/// Without a cursor the page ends at the newest item; an empty store yields nothing.
pub fn backward_page(
    session: &Session,
    old: Option<&str>,
    limits: &PageLimits,
) -> Result<Vec<ClipboardEntry>, RelayError> {
    let anchor = match old.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_cursor("old", raw)?,
        None => match session
            .latest()
            .map_err(|e| RelayError::storage("latest", "-", e))?
        {
            Some(latest) => latest.id.saturating_add(1),
            None => return Ok(Vec::new()),
        },
    };

    let records = session
        .range_before(anchor, limits.backward_page_size)
        .map_err(|e| RelayError::storage("range_before", anchor, e))?;
    Ok(entries(records))
}

/// Every item newer than `new`, oldest first
pub fn forward_page(
    session: &Session,
    new: Option<&str>,
    limits: &PageLimits,
) -> Result<Vec<ClipboardEntry>, RelayError> {
    let raw = new
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RelayError::MissingParameter("new"))?;
    let cursor = parse_cursor("new", raw)?;

    let records = session
        .range_after(cursor, limits.forward_page_cap)
        .map_err(|e| RelayError::storage("range_after", cursor, e))?;
    Ok(entries(records))
}

/// Substring search over content and device info, newest first
pub fn search(
    session: &Session,
    query: Option<&str>,
    limit: Option<&str>,
    limits: &PageLimits,
) -> Result<Vec<ClipboardEntry>, RelayError> {
    let query = query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(RelayError::MissingParameter("q"))?;
    let limit = parse_search_limit(limit, limits)?;

    let records = session
        .search_by_text(query, limit)
        .map_err(|e| RelayError::storage("search_by_text", query, e))?;
    Ok(entries(records))
}

/// Whether any item carries this fingerprint.
///
/// The index answers for every fingerprinted row. On a miss, legacy rows are
/// hashed and backfilled in id order until one matches, so each call leaves
/// the index more complete than it found it.
pub fn exists(session: &Session, sha256: Option<&str>) -> Result<bool, RelayError> {
    let raw = sha256
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RelayError::MissingParameter("sha256"))?;
    let target = parse_fingerprint(raw)?;

    let indexed = session
        .count_by_fingerprint(&target)
        .map_err(|e| RelayError::storage("count_by_fingerprint", &target, e))?;
    if indexed > 0 {
        return Ok(true);
    }

    for record in session.scan_missing_fingerprint() {
        let record = record.map_err(|e| RelayError::storage("scan_missing_fingerprint", &target, e))?;
        if let Some(computed) = backfill_record(session, &record) {
            if computed == target {
                debug!(id = record.id, fingerprint = %target, "matched legacy item during backfill");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Backfill every legacy row in one pass
pub fn backfill_all(session: &Session) -> Result<BackfillReport, RelayError> {
    let mut report = BackfillReport::default();
    for record in session.scan_missing_fingerprint() {
        let record = record.map_err(|e| RelayError::storage("scan_missing_fingerprint", "backfill", e))?;
        report.scanned += 1;
        match backfill_record(session, &record) {
            Some(_) => report.updated += 1,
            None => report.skipped += 1,
        }
    }
    info!(scanned = report.scanned, updated = report.updated, skipped = report.skipped, "backfill finished");
    Ok(report)
}

/// Hash one legacy row and persist the result.
/// Failures are logged and skipped; returns the fingerprint when the row is now indexed.
fn backfill_record(session: &Session, record: &ClipboardRecord) -> Option<String> {
    let computed = match fingerprint(record.kind, &record.content, &record.image_data) {
        Ok(fp) => fp,
        Err(e) => {
            warn!(id = record.id, error = %e, "cannot fingerprint legacy item, skipping");
            return None;
        }
    };

    match session.update_fingerprint(record.id, &computed) {
        // A concurrent backfill may have won; the value is identical either way
        Ok(_) => Some(computed),
        Err(e) => {
            warn!(id = record.id, fingerprint = %computed, error = %e, "failed to store backfilled fingerprint");
            None
        }
    }
}
