//! HTTP gateway exposing Nexus filesystem operations as a small REST
//! surface, mirroring the teacher's `/api/*` handler shape: `Query`
//! extractors for reads, `Json` bodies for writes, errors as
//! `(StatusCode, Json<Value>)`.

use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use nexus_core::permissions::CheckContext;
use nexus_core::{Nexus, NexusBuilder, NexusConfig, NexusError, OperationContext};

#[derive(Clone)]
struct AppContext {
    nexus: Arc<Nexus>,
    start_time: Instant,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: NexusError) -> ApiError {
    let status = match &err {
        NexusError::NotFound(_) => StatusCode::NOT_FOUND,
        NexusError::AccessDenied(_) => StatusCode::FORBIDDEN,
        NexusError::AlreadyExists(_) | NexusError::Conflict { .. } => StatusCode::CONFLICT,
        NexusError::InvalidPath(_) | NexusError::Validation(_) => StatusCode::BAD_REQUEST,
        NexusError::StaleSession { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

fn caller_context(subject: Option<String>) -> CheckContext {
    match subject {
        Some(s) => CheckContext::user(s),
        None => {
            let mut ctx = CheckContext::user("http-gateway");
            ctx.is_system = true;
            ctx
        }
    }
}

async fn api_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
    subject: Option<String>,
}

async fn api_read(State(ctx): State<AppContext>, Query(q): Query<PathQuery>) -> Result<impl IntoResponse, ApiError> {
    let mut op = OperationContext::new(caller_context(q.subject));
    let bytes = ctx.nexus.read(&q.path, &mut op).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "path": q.path, "content": String::from_utf8_lossy(&bytes) })))
}

#[derive(Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
    subject: Option<String>,
}

async fn api_write(State(ctx): State<AppContext>, Json(body): Json<WriteRequest>) -> Result<impl IntoResponse, ApiError> {
    let op = OperationContext::new(caller_context(body.subject));
    let version = ctx.nexus.write(&body.path, body.content.as_bytes(), &op).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "path": body.path, "version": version })))
}

async fn api_stat(State(ctx): State<AppContext>, Query(q): Query<PathQuery>) -> Result<impl IntoResponse, ApiError> {
    let mut op = OperationContext::new(caller_context(q.subject));
    let info = ctx.nexus.stat(&q.path, &mut op).map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "path": q.path,
        "size": info.size,
        "modified_at": info.modified_at,
        "backend_version": info.backend_version,
        "content_hash": info.content_hash,
    })))
}

#[derive(Deserialize)]
struct ListQuery {
    path: String,
    #[serde(default)]
    recursive: bool,
    subject: Option<String>,
}

async fn api_list(State(ctx): State<AppContext>, Query(q): Query<ListQuery>) -> Result<impl IntoResponse, ApiError> {
    let mut op = OperationContext::new(caller_context(q.subject));
    let entries = ctx.nexus.list(&q.path, q.recursive, &mut op).map_err(error_response)?;
    let entries: Vec<_> = entries
        .into_iter()
        .map(|e| serde_json::json!({ "name": e.name, "is_directory": e.is_directory }))
        .collect();
    Ok(Json(serde_json::json!({ "path": q.path, "entries": entries })))
}

#[derive(Deserialize)]
struct GlobQuery {
    pattern: String,
    base: String,
    subject: Option<String>,
}

async fn api_glob(State(ctx): State<AppContext>, Query(q): Query<GlobQuery>) -> Result<impl IntoResponse, ApiError> {
    let mut op = OperationContext::new(caller_context(q.subject));
    let matches = ctx.nexus.glob(&q.pattern, &q.base, &mut op).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "matches": matches })))
}

#[derive(Deserialize)]
struct GrepQuery {
    pattern: String,
    base: String,
    #[serde(default)]
    ignore_case: bool,
    file_pattern: Option<String>,
    max_results: Option<usize>,
    subject: Option<String>,
}

async fn api_grep(State(ctx): State<AppContext>, Query(q): Query<GrepQuery>) -> Result<impl IntoResponse, ApiError> {
    let mut op = OperationContext::new(caller_context(q.subject));
    let matches = ctx
        .nexus
        .grep(&q.pattern, &q.base, q.ignore_case, q.file_pattern.as_deref(), q.max_results.unwrap_or(100), &mut op)
        .map_err(error_response)?;
    let matches: Vec<_> = matches
        .into_iter()
        .map(|m| serde_json::json!({ "path": m.path, "line_number": m.line_number, "line": m.line }))
        .collect();
    Ok(Json(serde_json::json!({ "matches": matches })))
}

#[derive(Deserialize)]
struct MkdirRequest {
    path: String,
    #[serde(default)]
    parents: bool,
    subject: Option<String>,
}

async fn api_mkdir(State(ctx): State<AppContext>, Json(body): Json<MkdirRequest>) -> Result<impl IntoResponse, ApiError> {
    let op = OperationContext::new(caller_context(body.subject));
    ctx.nexus.mkdir(&body.path, body.parents, true, &op).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
struct DeleteRequest {
    path: String,
    subject: Option<String>,
}

async fn api_delete(State(ctx): State<AppContext>, Json(body): Json<DeleteRequest>) -> Result<impl IntoResponse, ApiError> {
    let op = OperationContext::new(caller_context(body.subject));
    ctx.nexus.delete(&body.path, &op).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
struct RenameRequest {
    from: String,
    to: String,
    subject: Option<String>,
}

async fn api_rename(State(ctx): State<AppContext>, Json(body): Json<RenameRequest>) -> Result<impl IntoResponse, ApiError> {
    let op = OperationContext::new(caller_context(body.subject));
    ctx.nexus.rename(&body.from, &body.to, &op).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("NEXUS_CONFIG").unwrap_or_else(|_| "nexus.toml".to_string());
    let config = NexusConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load config, using defaults");
        NexusConfig::default()
    });

    let nexus = match NexusBuilder::new(config).build() {
        Ok(n) => Arc::new(n),
        Err(e) => {
            eprintln!("failed to initialize nexus: {e}");
            std::process::exit(1);
        }
    };

    let ctx = AppContext { nexus, start_time: Instant::now() };

    let app = Router::new()
        .route("/health", get(api_health))
        .route("/api/file", get(api_read))
        .route("/api/write", post(api_write))
        .route("/api/stat", get(api_stat))
        .route("/api/list", get(api_list))
        .route("/api/glob", get(api_glob))
        .route("/api/grep", get(api_grep))
        .route("/api/mkdir", post(api_mkdir))
        .route("/api/delete", post(api_delete))
        .route("/api/rename", post(api_rename))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    let bind_addr = std::env::var("NEXUS_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8765".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap_or_else(|e| {
        tracing::error!(addr = %bind_addr, error = %e, "could not bind");
        std::process::exit(1);
    });

    tracing::info!(addr = %bind_addr, "nexus-http listening");
    axum::serve(listener, app).await.unwrap();
}
