//! HTTP adapter.
//!
//! Maps the relay API onto actix-web routes, turns `RelayError` into JSON
//! error bodies and guards `/api/*` with bearer tokens. Handlers stay thin:
//! parse, call the relay, serialize.

use crate::auth::{Claims, TokenAuthority};
use crate::config::ServerConfig;
use crate::interface::{ClipboardEntry, ClipboardRelayApi, IngestRequest, RelayError};
use actix_web::dev::Payload;
use actix_web::http::{header, StatusCode};
use actix_web::{middleware, web, App, FromRequest, HttpRequest, HttpResponse, HttpServer, ResponseError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::{ready, Ready};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state handed to every handler
pub struct AppState {
    pub relay: Arc<dyn ClipboardRelayApi>,
    pub auth: TokenAuthority,
}

impl AppState {
    pub fn new(relay: Arc<dyn ClipboardRelayApi>, auth: TokenAuthority) -> Self {
        Self { relay, auth }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RelayError::InvalidPayload(_)
            | RelayError::MissingParameter(_)
            | RelayError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Storage detail stays in the logs
        if self.is_client_error() {
            debug!(error = %self, "request rejected");
        } else {
            warn!(error = %self, "request failed");
        }
        let message = match self {
            RelayError::StorageError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Extractor for requests carrying a valid `Authorization: Bearer` token
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice(pub Claims);

impl FromRequest for AuthenticatedDevice {
    type Error = RelayError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(RelayError::StorageError("application state missing".to_string())));
        };
        // A non-UTF-8 header is treated as malformed, not as absent
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().unwrap_or_default());
        ready(state.auth.verify_header(header).map(AuthenticatedDevice))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/response bodies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub password: String,
    #[serde(default)]
    pub device_info: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
pub struct BackwardQuery {
    pub old: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForwardQuery {
    pub new: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    pub sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SplitWordsRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
struct SplitWordsResponse {
    words: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExistsResponse {
    exists: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, RelayError> {
    let body = body.into_inner();
    let token = state.auth.login(&body.password, &body.device_info)?;
    info!(device = %body.device_info, "issued token");
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

/// Liveness probe; reports the item count so a reachable but broken store shows up
async fn health(state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    let items = state.relay.item_count().await?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(json!({ "status": "ok", "items": items })))
}

async fn backward_page(
    state: web::Data<AppState>,
    _device: AuthenticatedDevice,
    query: web::Query<BackwardQuery>,
) -> Result<web::Json<Vec<ClipboardEntry>>, RelayError> {
    let entries = state.relay.backward_page(query.into_inner().old).await?;
    Ok(web::Json(entries))
}

async fn forward_page(
    state: web::Data<AppState>,
    _device: AuthenticatedDevice,
    query: web::Query<ForwardQuery>,
) -> Result<web::Json<Vec<ClipboardEntry>>, RelayError> {
    let entries = state.relay.forward_page(query.into_inner().new).await?;
    Ok(web::Json(entries))
}

async fn search(
    state: web::Data<AppState>,
    _device: AuthenticatedDevice,
    query: web::Query<SearchQuery>,
) -> Result<web::Json<Vec<ClipboardEntry>>, RelayError> {
    let SearchQuery { q, limit } = query.into_inner();
    let entries = state.relay.search(q, limit).await?;
    Ok(web::Json(entries))
}

/// 201 for a new item, 200 when the content was already stored
async fn ingest(
    state: web::Data<AppState>,
    device: AuthenticatedDevice,
    body: web::Json<IngestRequest>,
) -> Result<HttpResponse, RelayError> {
    let mut request = body.into_inner();
    if request.device_info.trim().is_empty() {
        request.device_info = device.0.device_info;
    }

    let outcome = state.relay.ingest(request).await?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok(HttpResponse::build(status).json(outcome.entry))
}

async fn exists(
    state: web::Data<AppState>,
    _device: AuthenticatedDevice,
    query: web::Query<ExistsQuery>,
) -> Result<HttpResponse, RelayError> {
    let exists = state.relay.exists(query.into_inner().sha256).await?;
    Ok(HttpResponse::Ok().json(ExistsResponse { exists }))
}

async fn split_words(
    state: web::Data<AppState>,
    _device: AuthenticatedDevice,
    body: web::Json<SplitWordsRequest>,
) -> HttpResponse {
    let words = state.relay.split_words(&body.text);
    HttpResponse::Ok().json(SplitWordsResponse { words })
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

/// Register every route plus body/query error handling.
/// `AppState` must be supplied separately as `web::Data`.
pub fn configure(cfg: &mut web::ServiceConfig, max_payload_bytes: usize) {
    let json_config = web::JsonConfig::default()
        .limit(max_payload_bytes)
        .error_handler(|err, _req| RelayError::InvalidPayload(err.to_string()).into());
    let query_config = web::QueryConfig::default().error_handler(|err, _req| {
        RelayError::InvalidParameter { name: "query", reason: err.to_string() }.into()
    });

    cfg.app_data(json_config)
        .app_data(query_config)
        .route("/auth", web::post().to(login))
        .route("/health", web::get().to(health))
        .service(
            web::scope("/api")
                .route("/clipboard", web::get().to(backward_page))
                .route("/clipboard", web::post().to(ingest))
                .route("/clipboard/latest", web::get().to(forward_page))
                .route("/clipboard/search", web::get().to(search))
                .route("/is_exist", web::get().to(exists))
                .route("/split-words", web::post().to(split_words)),
        );
}

/// Run the HTTP server until shutdown
pub async fn serve(config: ServerConfig, relay: Arc<dyn ClipboardRelayApi>) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(relay, TokenAuthority::new(config.auth.clone())));
    let max_payload_bytes = config.max_payload_bytes;

    info!(bind = %config.bind_addr, "starting HTTP server");
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(|cfg| configure(cfg, max_payload_bytes))
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}
