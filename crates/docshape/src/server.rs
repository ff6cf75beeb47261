//! JSON HTTP API.
//!
//! Exposes ingestion and the schema/record queries over HTTP. One
//! [`Pipeline`] is shared by every request, so concurrent ingests of the
//! same source are serialized.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest` | Ingest a file: `{"path": "...", "source_id": "..."}` |
//! | `GET`  | `/schema?source_id=` | Current schema |
//! | `GET`  | `/schema/history?source_id=` | All schema versions, ascending |
//! | `GET`  | `/schema/log?source_id=` | Evolution log, ascending |
//! | `GET`  | `/sources` | Source listing |
//! | `GET`  | `/records?source_id=&limit=&page=` | Stored records, `page` is 0-based |
//! | `GET`  | `/summary?source_id=` | Chunk types, top fields, schema history |
//! | `DELETE` | `/dataset?source_id=&confirm=1` | Quarantine a source's records |
//!
//! `POST /ingest` only reads files under `[server].ingest_root`. Relative
//! paths are resolved against it; anything resolving outside is a 400.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no schema for source: x" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `unsupported_format` | 400 |
//! | `not_found` | 404 |
//! | `schema_version_conflict` | 409 |
//! | `extraction_error` | 422 |
//! | `storage_error`, `internal` | 500 |
//!
//! # CORS
//!
//! Only the origins listed in `[server].cors_origins` are allowed.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use docshape_core::error::PipelineError;
use docshape_core::models::{EvolutionLogEntry, Record, Schema};
use docshape_core::store::{SourceOverview, Store, StoreError};

use crate::config::Config;
use crate::ingest::{derive_source_id, Pipeline, RunReport};
use crate::sources::{build_summary, records_page, SourceSummary, DEFAULT_RECORD_LIMIT};
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    ingest_root: Arc<PathBuf>,
}

impl AppState {
    /// `ingest_root` must already be canonical.
    pub fn new(pipeline: Arc<Pipeline>, ingest_root: PathBuf) -> Self {
        Self {
            pipeline,
            ingest_root: Arc::new(ingest_root),
        }
    }

    fn store(&self) -> &dyn Store {
        self.pipeline.store().as_ref()
    }
}

/// CORS layer admitting exactly `origins`.
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {}", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any))
}

/// Build the router. Exposed separately from [`run_server`] so callers can
/// embed it or serve it on their own listener.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/schema", get(handle_schema))
        .route("/schema/history", get(handle_schema_history))
        .route("/schema/log", get(handle_schema_log))
        .route("/sources", get(handle_sources))
        .route("/records", get(handle_records))
        .route("/summary", get(handle_summary))
        .route("/dataset", delete(handle_quarantine))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(&config.db.path).await?);
    let pipeline = Arc::new(Pipeline::from_config(config, store)?);

    let root = &config.server.ingest_root;
    std::fs::create_dir_all(root)
        .with_context(|| format!("failed to create ingest root: {}", root.display()))?;
    let ingest_root = root
        .canonicalize()
        .with_context(|| format!("failed to resolve ingest root: {}", root.display()))?;
    info!(ingest_root = %ingest_root.display(), "ingest root");

    let app = router(
        AppState::new(pipeline, ingest_root),
        cors_layer(&config.server.cors_origins)?,
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("docshape server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            PipelineError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::SchemaVersionConflict { .. } => StatusCode::CONFLICT,
            PipelineError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "ingest failed");
        }
        AppError::new(status, err.code(), err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => not_found(what),
            other => {
                error!(error = %other, "store query failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string())
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    path: PathBuf,
    #[serde(default)]
    source_id: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<RunReport>, AppError> {
    let path = resolve_ingest_path(&state.ingest_root, &req.path)?;
    let source_id = match req.source_id {
        Some(id) if id.trim().is_empty() => return Err(bad_request("source_id must not be empty")),
        Some(id) => id,
        None => derive_source_id(&path),
    };
    let report = state.pipeline.run(&path, &source_id).await?;
    Ok(Json(report))
}

/// Resolve `requested` against `root` (canonical), following symlinks.
/// The result must be a file inside `root`.
fn resolve_ingest_path(root: &Path, requested: &Path) -> Result<PathBuf, AppError> {
    let outside = || {
        bad_request(format!(
            "path is outside the ingest root: {}",
            requested.display()
        ))
    };
    let candidate = root.join(requested);
    match candidate.canonicalize() {
        Ok(resolved) if !resolved.starts_with(root) => Err(outside()),
        Ok(resolved) if resolved.is_file() => Ok(resolved),
        Ok(_) => Err(not_found(format!("not a file: {}", requested.display()))),
        Err(_) => {
            let escapes = requested
                .components()
                .any(|c| matches!(c, Component::ParentDir));
            if escapes || !candidate.starts_with(root) {
                Err(outside())
            } else {
                Err(not_found(format!("file not found: {}", requested.display())))
            }
        }
    }
}

// ============ schema queries ============

#[derive(Deserialize)]
struct SourceQuery {
    source_id: String,
}

async fn handle_schema(
    State(state): State<AppState>,
    Query(q): Query<SourceQuery>,
) -> Result<Json<Schema>, AppError> {
    state
        .pipeline
        .current_schema(&q.source_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no schema for source: {}", q.source_id)))
}

async fn handle_schema_history(
    State(state): State<AppState>,
    Query(q): Query<SourceQuery>,
) -> Result<Json<Vec<Schema>>, AppError> {
    Ok(Json(state.store().schema_history(&q.source_id).await?))
}

async fn handle_schema_log(
    State(state): State<AppState>,
    Query(q): Query<SourceQuery>,
) -> Result<Json<Vec<EvolutionLogEntry>>, AppError> {
    Ok(Json(state.store().evolution_log(&q.source_id).await?))
}

// ============ GET /sources ============

async fn handle_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceOverview>>, AppError> {
    Ok(Json(state.store().list_sources().await?))
}

// ============ GET /records ============

#[derive(Deserialize)]
struct RecordsQuery {
    source_id: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    page: i64,
}

fn default_limit() -> i64 {
    DEFAULT_RECORD_LIMIT
}

async fn handle_records(
    State(state): State<AppState>,
    Query(q): Query<RecordsQuery>,
) -> Result<Json<Vec<Record>>, AppError> {
    if q.limit < 1 || q.page < 0 {
        return Err(bad_request("limit must be >= 1 and page >= 0"));
    }
    let records = records_page(state.store(), &q.source_id, q.limit, q.page).await?;
    if records.is_empty() && q.page == 0 {
        return Err(not_found(format!(
            "no records for source: {}",
            q.source_id
        )));
    }
    Ok(Json(records))
}

// ============ GET /summary ============

async fn handle_summary(
    State(state): State<AppState>,
    Query(q): Query<SourceQuery>,
) -> Result<Json<SourceSummary>, AppError> {
    build_summary(state.store(), &q.source_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no schema for source: {}", q.source_id)))
}

// ============ DELETE /dataset ============

#[derive(Deserialize)]
struct QuarantineQuery {
    source_id: String,
    #[serde(default)]
    confirm: u8,
}

#[derive(Serialize)]
struct QuarantineResponse {
    status: String,
    moved_to: String,
}

async fn handle_quarantine(
    State(state): State<AppState>,
    Query(q): Query<QuarantineQuery>,
) -> Result<Json<QuarantineResponse>, AppError> {
    if q.confirm != 1 {
        return Err(bad_request("quarantine requires confirm=1"));
    }
    let moved_to = state.store().quarantine(&q.source_id).await?;
    info!(source_id = %q.source_id, %moved_to, "source quarantined");
    Ok(Json(QuarantineResponse {
        status: "ok".to_string(),
        moved_to,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root_with_file() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("inbox");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "a: 1").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "s: 1").unwrap();
        let root = root.canonicalize().unwrap();
        (tmp, root)
    }

    #[test]
    fn relative_paths_resolve_inside_the_root() {
        let (_tmp, root) = root_with_file();
        let resolved = resolve_ingest_path(&root, Path::new("a.txt")).unwrap();
        assert_eq!(resolved, root.join("a.txt"));
    }

    #[test]
    fn absolute_paths_inside_the_root_are_accepted() {
        let (_tmp, root) = root_with_file();
        assert!(resolve_ingest_path(&root, &root.join("a.txt")).is_ok());
    }

    #[test]
    fn paths_escaping_the_root_are_rejected() {
        let (tmp, root) = root_with_file();
        let err = resolve_ingest_path(&root, Path::new("../secret.txt")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let absolute = tmp.path().join("secret.txt");
        let err = resolve_ingest_path(&root, &absolute).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = resolve_ingest_path(&root, Path::new("../missing.txt")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_files_inside_the_root_are_not_found() {
        let (_tmp, root) = root_with_file();
        let err = resolve_ingest_path(&root, Path::new("nope.txt")).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn cors_origins_must_be_valid_header_values() {
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_ok());
        assert!(cors_layer(&["http://bad\norigin".to_string()]).is_err());
    }
}
