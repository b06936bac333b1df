//! Relay configuration.
//!
//! `RelayConfig` covers storage and query behaviour, `ServerConfig` the HTTP
//! listener and authentication. Both are built once at startup, either
//! programmatically or from the command line, and passed down explicitly.

use crate::auth::{AuthConfig, DEFAULT_TOKEN_EXPIRY};
use crate::sync::{PageLimits, DEFAULT_BACKWARD_PAGE_SIZE, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::tokenizer::TokenizerStrategy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "clipboard.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5859";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POOL_SIZE: u32 = 8;
/// Images travel base64-encoded inside JSON, so the body limit is generous
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Storage and query configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Pooled connections.
    pub pool_size: u32,
    /// Page and search windows.
    pub limits: PageLimits,
    /// Deadline for a single read operation.
    pub request_timeout: Duration,
    /// Algorithm behind split-words.
    pub tokenizer: TokenizerStrategy,
}

impl RelayConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            pool_size: DEFAULT_POOL_SIZE,
            limits: PageLimits::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tokenizer: TokenizerStrategy::default(),
        }
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: TokenizerStrategy) -> Self {
        self.tokenizer = tokenizer;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    pub auth: AuthConfig,
    /// Largest accepted JSON body.
    pub max_payload_bytes: usize,
}

impl ServerConfig {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            auth,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

/// Options shared by every subcommand that touches the database
#[derive(clap::Args, Debug, Clone)]
pub struct StorageArgs {
    /// Path to the SQLite database
    #[arg(long, env = "PURR_RELAY_DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Connection pool size
    #[arg(long, env = "PURR_RELAY_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: u32,
}

impl StorageArgs {
    pub fn into_config(self) -> RelayConfig {
        RelayConfig::new(self.db_path).with_pool_size(self.pool_size)
    }
}

/// Options of the `serve` subcommand
#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Address to listen on
    #[arg(long, env = "PURR_RELAY_BIND", default_value = DEFAULT_BIND_ADDR)]
    pub bind: String,

    /// Shared password devices exchange for a token
    #[arg(long, env = "PURR_RELAY_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Token signing secret; a random one is generated when omitted
    #[arg(long, env = "PURR_RELAY_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Token lifetime in seconds
    #[arg(long, env = "PURR_RELAY_TOKEN_TTL_SECS", default_value_t = DEFAULT_TOKEN_EXPIRY.as_secs())]
    pub token_ttl_secs: u64,

    /// Items per backward page
    #[arg(long, env = "PURR_RELAY_PAGE_SIZE", default_value_t = DEFAULT_BACKWARD_PAGE_SIZE)]
    pub page_size: usize,

    /// Search results when no limit is given
    #[arg(long, env = "PURR_RELAY_SEARCH_LIMIT", default_value_t = DEFAULT_SEARCH_LIMIT)]
    pub search_limit: usize,

    /// Upper bound for a requested search limit
    #[arg(long, env = "PURR_RELAY_SEARCH_MAX_LIMIT", default_value_t = MAX_SEARCH_LIMIT)]
    pub search_max_limit: usize,

    /// Cap on items returned by a forward page (unbounded when omitted)
    #[arg(long, env = "PURR_RELAY_FORWARD_CAP")]
    pub forward_cap: Option<usize>,

    /// Read operation timeout in seconds
    #[arg(long, env = "PURR_RELAY_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout_secs: u64,

    /// Largest accepted request body in bytes
    #[arg(long, env = "PURR_RELAY_MAX_PAYLOAD", default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: usize,

    /// Word splitting algorithm
    #[arg(long, env = "PURR_RELAY_TOKENIZER", value_enum, default_value_t = TokenizerStrategy::Chunked)]
    pub tokenizer: TokenizerStrategy,
}

impl ServeArgs {
    pub fn into_configs(self) -> (RelayConfig, ServerConfig) {
        let limits = PageLimits {
            backward_page_size: self.page_size.max(1),
            forward_page_cap: self.forward_cap,
            search_default_limit: self.search_limit,
            search_max_limit: self.search_max_limit.max(1),
        };
        let relay = self
            .storage
            .into_config()
            .with_limits(limits)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_tokenizer(self.tokenizer);

        let mut auth = AuthConfig::new(self.password)
            .with_expiry(Duration::from_secs(self.token_ttl_secs));
        if let Some(secret) = self.secret {
            auth = auth.with_secret(secret.into_bytes());
        }
        let server = ServerConfig::new(auth)
            .with_bind_addr(self.bind)
            .with_max_payload_bytes(self.max_payload_bytes);

        (relay, server)
    }
}
