//! SQLite database layer for the relay
//!
//! One append-only `items` table keyed by an AUTOINCREMENT id, with a
//! secondary index on `fingerprint`. Uses r2d2 connection pooling so reads
//! proceed concurrently under WAL while writers serialize on SQLite's own lock.

use crate::interface::{ClipKind, ClipboardRecord, NewRecord};
use chrono::{DateTime, TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Rows fetched per round trip by the missing-fingerprint scan
const SCAN_BATCH_SIZE: usize = 64;

const RECORD_COLUMNS: &str = "id, kind, content, deviceInfo, imageData, fingerprint, createdAt";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
    #[error("Query interrupted")]
    Interrupted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ffi::ErrorCode::OperationInterrupted =>
            {
                DatabaseError::Interrupted
            }
            other => DatabaseError::Sqlite(other),
        }
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Parse a timestamp string from the database.
/// Accepts our own format and the offset-carrying format legacy rows were written with.
fn parse_db_timestamp(timestamp_str: &str) -> DateTime<Utc> {
    DateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S%.f%:z")
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(timestamp_str).map(|dt| dt.with_timezone(&Utc)))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(timestamp_str, TIMESTAMP_FORMAT)
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S"))
                .map(|dt| Utc.from_utc_datetime(&dt))
        })
        .unwrap_or_else(|_| Utc::now())
}

fn format_db_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Thread-safe database wrapper using connection pooling
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA busy_timeout=5000;
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-32000;
                ")?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(any(test, feature = "test-support"))]
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Check out a connection carrying the clipboard operations
    pub fn session(&self) -> DatabaseResult<Session> {
        Ok(Session { conn: self.pool.get()? })
    }

    /// Set up the schema, importing or evolving older layouts in place
    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.pool.get()?;

        let has_items = table_exists(&conn, "items")?;
        if !has_items && table_exists(&conn, "clipboard_items")? {
            Self::migrate_from_legacy_table(&conn)?;
        }

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                deviceInfo TEXT NOT NULL DEFAULT '',
                imageData BLOB,
                fingerprint TEXT,
                createdAt TEXT NOT NULL
            );
        "#)?;

        // Additive evolution: tables created before fingerprints existed gain a nullable column
        let has_fingerprint = conn
            .prepare("SELECT fingerprint FROM items LIMIT 0")
            .is_ok();
        if !has_fingerprint {
            info!("adding fingerprint column to items");
            conn.execute_batch("ALTER TABLE items ADD COLUMN fingerprint TEXT")?;
        }

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_items_fingerprint ON items(fingerprint);",
        )?;

        Ok(())
    }

    /// Import rows from the table written by the earlier deployment
    /// (`clipboard_items`, soft-deletable, snake_case columns).
    /// Ids and timestamps are preserved; fingerprints are left for backfill.
    fn migrate_from_legacy_table(conn: &Connection) -> DatabaseResult<()> {
        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(r#"
            CREATE TABLE items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                deviceInfo TEXT NOT NULL DEFAULT '',
                imageData BLOB,
                fingerprint TEXT,
                createdAt TEXT NOT NULL
            );
        "#)?;

        let has_deleted_at = tx
            .prepare("SELECT deleted_at FROM clipboard_items LIMIT 0")
            .is_ok();
        let live_filter = if has_deleted_at { "WHERE deleted_at IS NULL" } else { "" };

        let imported = tx.execute(
            &format!(
                r#"INSERT INTO items (id, kind, content, deviceInfo, imageData, fingerprint, createdAt)
                   SELECT id,
                          CASE WHEN type = 'image' THEN 'image' ELSE 'text' END,
                          COALESCE(content, ''),
                          COALESCE(device_info, ''),
                          CASE WHEN type = 'image' THEN image_data ELSE NULL END,
                          NULL,
                          COALESCE(created_at, CURRENT_TIMESTAMP)
                   FROM clipboard_items {}
                   ORDER BY id"#,
                live_filter
            ),
            [],
        )?;

        // Soft-deleted rows still own their ids; keep the sequence past them
        let legacy_max: Option<i64> =
            tx.query_row("SELECT MAX(id) FROM clipboard_items", [], |row| row.get(0))?;
        if let Some(max_id) = legacy_max {
            let updated = tx.execute(
                "UPDATE sqlite_sequence SET seq = MAX(seq, ?1) WHERE name = 'items'",
                [max_id],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO sqlite_sequence (name, seq) VALUES ('items', ?1)",
                    [max_id],
                )?;
            }
        }

        tx.execute_batch("DROP TABLE clipboard_items")?;
        tx.commit()?;

        info!(imported, "migrated legacy clipboard_items table");
        Ok(())
    }
}

fn table_exists(conn: &Connection, name: &str) -> DatabaseResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// A pooled connection exposing the clipboard store operations.
///
/// Every statement runs to completion before the method returns, so nothing
/// holds a read cursor or lock between calls.
pub struct Session {
    conn: PooledConnection<SqliteConnectionManager>,
}

/// Keeps an interrupt watcher alive for the duration of a cancellable call.
/// Dropping it stops the watcher.
pub struct InterruptGuard {
    _watcher: AbortOnDropHandle<()>,
}

impl Session {
    /// Interrupt whatever statement this connection is running once `token` is cancelled.
    /// The interrupted call fails with `DatabaseError::Interrupted`.
    pub fn interrupt_on(
        &self,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> InterruptGuard {
        let interrupt_handle = self.conn.get_interrupt_handle();
        let token = token.clone();
        let watcher = runtime.spawn(async move {
            token.cancelled().await;
            interrupt_handle.interrupt();
        });
        InterruptGuard { _watcher: AbortOnDropHandle::new(watcher) }
    }

    /// Total number of records
    pub fn count_items(&self) -> DatabaseResult<u64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Append a record and return its id. Never deduplicates.
    pub fn append(&self, record: &NewRecord) -> DatabaseResult<i64> {
        Ok(insert_record(&self.conn, record)?.id)
    }

    /// Append unless a record with the same fingerprint exists.
    ///
    /// Lookup and insert share one `BEGIN IMMEDIATE` transaction, so two
    /// concurrent callers with identical content cannot both insert.
    /// Returns the canonical record and whether it was created here.
    pub fn append_unique(&self, record: &NewRecord) -> DatabaseResult<(ClipboardRecord, bool)> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        if let Some(existing) = query_by_fingerprint(&tx, &record.fingerprint)? {
            tx.commit()?;
            return Ok((existing, false));
        }

        let created = insert_record(&tx, record)?;
        tx.commit()?;
        Ok((created, true))
    }

    /// Fetch a single record
    pub fn get(&self, id: i64) -> DatabaseResult<Option<ClipboardRecord>> {
        let sql = format!("SELECT {} FROM items WHERE id = ?1", RECORD_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], row_to_record).optional()?)
    }

    /// Most recent record carrying this fingerprint
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> DatabaseResult<Option<ClipboardRecord>> {
        query_by_fingerprint(&self.conn, fingerprint)
    }

    /// Records with `id < before`, newest first, at most `limit`
    pub fn range_before(&self, before: i64, limit: usize) -> DatabaseResult<Vec<ClipboardRecord>> {
        let sql = format!(
            "SELECT {} FROM items WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![before, limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records with `id > after`, oldest first. `None` means no limit.
    pub fn range_after(&self, after: i64, limit: Option<usize>) -> DatabaseResult<Vec<ClipboardRecord>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT {} FROM items WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![after, limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Highest-id record
    pub fn latest(&self) -> DatabaseResult<Option<ClipboardRecord>> {
        let sql = format!("SELECT {} FROM items ORDER BY id DESC LIMIT 1", RECORD_COLUMNS);
        Ok(self.conn.query_row(&sql, [], row_to_record).optional()?)
    }

    /// Records whose content or device info contains `needle`, newest first.
    /// LIKE semantics: ASCII letters match case-insensitively.
    pub fn search_by_text(&self, needle: &str, limit: usize) -> DatabaseResult<Vec<ClipboardRecord>> {
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);
        let sql = format!(
            r#"SELECT {} FROM items
               WHERE content LIKE ?1 ESCAPE '\' OR deviceInfo LIKE ?1 ESCAPE '\'
               ORDER BY id DESC
               LIMIT ?2"#,
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![pattern, limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Number of records indexed under this fingerprint
    pub fn count_by_fingerprint(&self, fingerprint: &str) -> DatabaseResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE fingerprint = ?1",
            [fingerprint],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Lazily walk records that have no fingerprint yet, in id order.
    /// Fetches bounded batches, so the table is never materialized.
    pub fn scan_missing_fingerprint(&self) -> MissingFingerprintScan<'_> {
        MissingFingerprintScan {
            session: self,
            after: 0,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Set the fingerprint of a legacy record.
    /// A record that already has one is left untouched; returns whether a row changed.
    pub fn update_fingerprint(&self, id: i64, fingerprint: &str) -> DatabaseResult<bool> {
        let changed = self.conn.execute(
            "UPDATE items SET fingerprint = ?1 WHERE id = ?2 AND (fingerprint IS NULL OR fingerprint = '')",
            params![fingerprint, id],
        )?;
        Ok(changed > 0)
    }

    fn missing_fingerprint_batch(&self, after: i64, limit: usize) -> DatabaseResult<Vec<ClipboardRecord>> {
        let sql = format!(
            r#"SELECT {} FROM items
               WHERE (fingerprint IS NULL OR fingerprint = '') AND id > ?1
               ORDER BY id ASC
               LIMIT ?2"#,
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![after, limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Keyset-paged iterator over records lacking a fingerprint
pub struct MissingFingerprintScan<'s> {
    session: &'s Session,
    after: i64,
    pending: VecDeque<ClipboardRecord>,
    exhausted: bool,
}

impl Iterator for MissingFingerprintScan<'_> {
    type Item = DatabaseResult<ClipboardRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && !self.exhausted {
            match self.session.missing_fingerprint_batch(self.after, SCAN_BATCH_SIZE) {
                Ok(batch) => {
                    self.exhausted = batch.len() < SCAN_BATCH_SIZE;
                    if let Some(last) = batch.last() {
                        self.after = last.id;
                    }
                    self.pending.extend(batch);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.pending.pop_front().map(Ok)
    }
}

fn insert_record(conn: &Connection, record: &NewRecord) -> DatabaseResult<ClipboardRecord> {
    let created_at = Utc::now();
    let image_data: Option<&[u8]> = match record.kind {
        ClipKind::Image => Some(record.image_data.as_slice()),
        ClipKind::Text => None,
    };

    conn.execute(
        r#"INSERT INTO items (kind, content, deviceInfo, imageData, fingerprint, createdAt)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        params![
            record.kind.database_type(),
            record.content,
            record.device_info,
            image_data,
            record.fingerprint,
            format_db_timestamp(created_at),
        ],
    )?;
    let id = conn.last_insert_rowid();

    // Round-trip through the stored format so callers see what readers will see
    let created_at = parse_db_timestamp(&format_db_timestamp(created_at));

    Ok(ClipboardRecord {
        id,
        kind: record.kind,
        content: record.content.clone(),
        device_info: record.device_info.clone(),
        image_data: image_data.map(<[u8]>::to_vec).unwrap_or_default(),
        fingerprint: Some(record.fingerprint.clone()),
        created_at,
    })
}

fn query_by_fingerprint(conn: &Connection, fingerprint: &str) -> DatabaseResult<Option<ClipboardRecord>> {
    let sql = format!(
        "SELECT {} FROM items WHERE fingerprint = ?1 ORDER BY id DESC LIMIT 1",
        RECORD_COLUMNS
    );
    Ok(conn.query_row(&sql, [fingerprint], row_to_record).optional()?)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ClipboardRecord> {
    let id: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    let content: Option<String> = row.get(2)?;
    let device_info: Option<String> = row.get(3)?;
    let image_data: Option<Vec<u8>> = row.get(4)?;
    let fingerprint: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    let kind = match kind.as_str() {
        "image" => ClipKind::Image,
        _ => ClipKind::Text,
    };

    Ok(ClipboardRecord {
        id,
        kind,
        content: content.unwrap_or_default(),
        device_info: device_info.unwrap_or_default(),
        image_data: image_data.unwrap_or_default(),
        fingerprint: fingerprint.filter(|fp| !fp.is_empty()),
        created_at: parse_db_timestamp(&created_at),
    })
}
