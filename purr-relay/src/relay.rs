//! ClipboardRelay - async facade over the store
//!
//! Async Cancellation Architecture:
//! Every operation runs on a blocking-pool thread with its own pooled
//! connection. Reads arm that connection's SQLite interrupt with a
//! CancellationToken. When the HTTP layer drops a request future, a DropGuard
//! cancels the token; when the request deadline passes, the token is cancelled
//! explicitly. Either way the running statement aborts and the caller gets
//! `RelayError::Cancelled`, never a partial page.

use crate::config::RelayConfig;
use crate::database::{Database, Session};
use crate::interface::{
    BackfillReport, ClipboardEntry, ClipboardRelayApi, IngestOutcome, IngestRequest, RelayError,
};
use crate::sync::PageLimits;
use crate::tokenizer::TokenizerStrategy;
use crate::{ingest, sync};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Global fallback Tokio runtime for calls made outside any runtime context.
/// Shared across all relays and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

/// RAII guard that cancels a token when dropped.
/// Dropping the request future drops this guard, which interrupts the query.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// The production `ClipboardRelayApi`.
///
/// Concurrency Model:
/// - Database uses an r2d2 pool; every call checks out its own connection
/// - No in-process lock is held across a store call
/// - Appends serialize on SQLite's writer lock (see `Session::append_unique`)
/// - Blocking work runs on the runtime's blocking pool
pub struct ClipboardRelay {
    db: Arc<Database>,
    limits: PageLimits,
    tokenizer: TokenizerStrategy,
    request_timeout: Duration,
}

impl ClipboardRelay {
    /// Open (or create and migrate) the database named by `config`
    pub fn open(config: &RelayConfig) -> Result<Self, RelayError> {
        let db = Database::open(&config.db_path, config.pool_size)
            .map_err(|e| RelayError::storage("open", config.db_path.display(), e))?;
        info!(path = %config.db_path.display(), pool_size = config.pool_size, "opened clipboard database");
        Ok(Self::from_database(db, config))
    }

    /// Relay over an in-memory database (for testing)
    #[cfg(any(test, feature = "test-support"))]
    pub fn new_in_memory() -> Result<Self, RelayError> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db, &RelayConfig::default()))
    }

    fn from_database(db: Database, config: &RelayConfig) -> Self {
        Self {
            db: Arc::new(db),
            limits: config.limits,
            tokenizer: config.tokenizer,
            request_timeout: config.request_timeout,
        }
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fingerprint every legacy row in one pass.
    /// Not bound by the request timeout.
    pub async fn backfill(&self) -> Result<BackfillReport, RelayError> {
        self.run_blocking("backfill", sync::backfill_all).await
    }

    /// Get a tokio runtime handle - uses current runtime if available, otherwise global fallback
    fn runtime_handle(&self) -> tokio::runtime::Handle {
        tokio::runtime::Handle::try_current()
            .unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
    }

    /// Run a cancellable read on a pooled connection, bounded by the request timeout
    async fn read<T, F>(&self, operation: &'static str, f: F) -> Result<T, RelayError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, RelayError> + Send + 'static,
    {
        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let runtime = self.runtime_handle();
        let runtime_for_closure = runtime.clone();
        let db = Arc::clone(&self.db);
        let token_clone = token.clone();

        let handle = runtime.spawn_blocking(move || {
            let session = db
                .session()
                .map_err(|e| RelayError::storage(operation, "checkout", e))?;
            // Declared after the session so the watcher stops before the connection is returned
            let _interrupt = session.interrupt_on(&token_clone, &runtime_for_closure);
            f(&session)
        });

        // The timer lives on the relay's runtime so callers without one still get a deadline
        let timeout = self.request_timeout;
        let deadline = runtime.spawn(async move { tokio::time::timeout(timeout, handle).await });

        match deadline.await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(_join_error))) => Err(RelayError::Cancelled),
            Ok(Err(_elapsed)) => {
                warn!(operation, timeout_ms = timeout.as_millis() as u64, "request timed out");
                token.cancel();
                Err(RelayError::Cancelled)
            }
            Err(_join_error) => Err(RelayError::Cancelled),
        }
    }

    /// Run a write to completion; writes are never interrupted halfway
    async fn run_blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T, RelayError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, RelayError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let handle = self.runtime_handle().spawn_blocking(move || {
            let session = db
                .session()
                .map_err(|e| RelayError::storage(operation, "checkout", e))?;
            f(&session)
        });

        match handle.await {
            Ok(result) => result,
            Err(_join_error) => Err(RelayError::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl ClipboardRelayApi for ClipboardRelay {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, RelayError> {
        let (record, created) = self
            .run_blocking("ingest", move |session| ingest::ingest(session, request))
            .await?;
        Ok(IngestOutcome {
            entry: record.into_entry(),
            created,
        })
    }

    async fn backward_page(&self, old: Option<String>) -> Result<Vec<ClipboardEntry>, RelayError> {
        let limits = self.limits;
        self.read("backward_page", move |session| {
            sync::backward_page(session, old.as_deref(), &limits)
        })
        .await
    }

    async fn forward_page(&self, new: Option<String>) -> Result<Vec<ClipboardEntry>, RelayError> {
        let limits = self.limits;
        self.read("forward_page", move |session| {
            sync::forward_page(session, new.as_deref(), &limits)
        })
        .await
    }

    async fn search(
        &self,
        query: Option<String>,
        limit: Option<String>,
    ) -> Result<Vec<ClipboardEntry>, RelayError> {
        let limits = self.limits;
        self.read("search", move |session| {
            sync::search(session, query.as_deref(), limit.as_deref(), &limits)
        })
        .await
    }

    async fn exists(&self, sha256: Option<String>) -> Result<bool, RelayError> {
        self.read("exists", move |session| sync::exists(session, sha256.as_deref()))
            .await
    }

    fn split_words(&self, text: &str) -> Vec<String> {
        self.tokenizer.tokenize(text)
    }

    async fn item_count(&self) -> Result<u64, RelayError> {
        self.read("item_count", |session| {
            session
                .count_items()
                .map_err(|e| RelayError::storage("count_items", "-", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::interface::{ClipKind, NewRecord};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn text(content: &str) -> IngestRequest {
        IngestRequest {
            content: content.to_string(),
            device_info: "laptop".to_string(),
            kind: "text".to_string(),
            image_data: None,
        }
    }

    #[test]
    fn test_ingest_and_poll() {
        let rt = runtime();
        let relay = ClipboardRelay::new_in_memory().unwrap();

        let first = rt.block_on(relay.ingest(text("Hello World"))).unwrap();
        assert!(first.created);
        let dup = rt.block_on(relay.ingest(text("Hello World"))).unwrap();
        assert!(!dup.created);
        assert_eq!(dup.entry.id, first.entry.id);

        let page = rt.block_on(relay.forward_page(Some("0".to_string()))).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "Hello World");
        assert_eq!(rt.block_on(relay.item_count()).unwrap(), 1);
    }

    #[test]
    fn test_backward_page_on_empty_relay() {
        let rt = runtime();
        let relay = ClipboardRelay::new_in_memory().unwrap();
        assert!(rt.block_on(relay.backward_page(None)).unwrap().is_empty());
    }

    #[test]
    fn test_errors_pass_through() {
        let rt = runtime();
        let relay = ClipboardRelay::new_in_memory().unwrap();
        assert_eq!(
            rt.block_on(relay.forward_page(None)),
            Err(RelayError::MissingParameter("new"))
        );
        assert!(matches!(
            rt.block_on(relay.exists(Some("nope".to_string()))),
            Err(RelayError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_split_words_uses_configured_strategy() {
        let relay = ClipboardRelay::new_in_memory().unwrap();
        assert_eq!(relay.split_words("世界你好"), vec!["世界", "你好"]);

        let config = RelayConfig::default().with_tokenizer(TokenizerStrategy::ScriptRuns);
        let relay = ClipboardRelay::from_database(Database::open_in_memory().unwrap(), &config);
        assert_eq!(relay.split_words("世界你好"), vec!["世界你好"]);
    }

    #[test]
    fn test_backfill_reports_nothing_on_modern_store() {
        let rt = runtime();
        let relay = ClipboardRelay::new_in_memory().unwrap();
        rt.block_on(relay.ingest(text("fresh"))).unwrap();
        let report = rt.block_on(relay.backfill()).unwrap();
        assert_eq!(report, BackfillReport::default());
    }

    #[tokio::test]
    async fn test_dropped_read_leaves_relay_usable() {
        let relay = ClipboardRelay::new_in_memory().unwrap();
        for i in 0..100 {
            relay.ingest(text(&format!("Item number {}", i))).await.unwrap();
        }

        // Dropping the future without awaiting triggers the DropGuard
        let pending = relay.search(Some("Item".to_string()), None);
        drop(pending);

        let result = relay.search(Some("Item".to_string()), None).await.unwrap();
        assert_eq!(result.len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_timeout_interrupts_slow_read() {
        let relay = ClipboardRelay::new_in_memory()
            .unwrap()
            .with_request_timeout(Duration::from_millis(1));
        {
            // Large enough that a full LIKE scan outlasts the timer resolution
            let session = relay.db.session().unwrap();
            let filler = "lorem ipsum dolor sit amet ".repeat(8);
            for i in 0..60_000 {
                let content = format!("{}{}", filler, i);
                session
                    .append(&NewRecord {
                        kind: ClipKind::Text,
                        fingerprint: fingerprint(ClipKind::Text, &content, &[]).unwrap(),
                        content,
                        device_info: "laptop".to_string(),
                        image_data: Vec::new(),
                    })
                    .unwrap();
            }
        }

        let result = relay.search(Some("zzz-no-match".to_string()), None).await;
        assert_eq!(result, Err(RelayError::Cancelled));

        // The interrupted connection goes back to the pool in working order
        let relay = relay.with_request_timeout(Duration::from_secs(5));
        let page = relay.forward_page(Some("0".to_string())).await.unwrap();
        assert_eq!(page.len(), 60_000);
    }

    #[test]
    fn test_with_limits_overrides_config() {
        let rt = runtime();
        let relay = ClipboardRelay::new_in_memory().unwrap().with_limits(PageLimits {
            backward_page_size: 2,
            search_default_limit: 3,
            ..PageLimits::default()
        });
        for i in 0..5 {
            rt.block_on(relay.ingest(text(&format!("entry {}", i)))).unwrap();
        }

        let page = rt.block_on(relay.backward_page(None)).unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 4]);
        let found = rt.block_on(relay.search(Some("entry".to_string()), None)).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_aborted_tasks_do_not_corrupt_store() {
        let relay = Arc::new(ClipboardRelay::new_in_memory().unwrap());
        for i in 0..20 {
            relay.ingest(text(&format!("Item number {}", i))).await.unwrap();
        }

        for _ in 0..5 {
            let relay_clone = Arc::clone(&relay);
            let handle = tokio::spawn(async move {
                relay_clone.forward_page(Some("0".to_string())).await
            });
            handle.abort();
            let _ = handle.await;
        }

        let page = relay.forward_page(Some("0".to_string())).await.unwrap();
        assert_eq!(page.len(), 20);
        relay.ingest(text("after aborts")).await.unwrap();
        assert_eq!(relay.item_count().await.unwrap(), 21);
    }

    #[test]
    fn test_dropguard_cancels_on_panic() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let result = std::panic::catch_unwind(|| {
            let _guard = DropGuard::new(token_clone);
            panic!("Intentional panic to test unwinding");
        });

        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_runs_on_fallback_runtime() {
        let relay = ClipboardRelay::new_in_memory().unwrap();
        let outcome = FALLBACK_RUNTIME.block_on(relay.ingest(text("no runtime"))).unwrap();
        assert!(outcome.created);
        let found = FALLBACK_RUNTIME
            .block_on(relay.search(Some("runtime".to_string()), None))
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
