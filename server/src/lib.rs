use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use research_core::{DocumentRecord, Error as CoreError, IndexConfig, IndexService, SearchResults};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

#[derive(Deserialize)]
pub struct ProcessRequest {
    pub query: String,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize { 1 }
fn default_per_page() -> usize { 10 }

/// Upper bound on `per_page` so one request cannot pull the whole corpus.
const MAX_PER_PAGE: usize = 100;

#[derive(Deserialize)]
pub struct AutocompleteParams {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub input: String,
    pub total: usize,
    pub fallback: bool,
    pub took_s: f64,
    pub output: Vec<research_core::SearchHit>,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IndexService>,
    pub admin_token: Option<String>,
}

/// Core errors mapped onto HTTP statuses.
pub struct ApiError(StatusCode, serde_json::Value);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let (status, kind) = if err.is_validation() {
            (StatusCode::BAD_REQUEST, "validation")
        } else if err.is_storage_fault() {
            (StatusCode::INTERNAL_SERVER_ERROR, "storage_fault")
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        };
        if status.is_server_error() {
            tracing::error!(error = %err, kind, "request failed");
        }
        ApiError(status, serde_json::json!({ "error": err.to_string(), "kind": kind }))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

fn join_error(err: tokio::task::JoinError) -> ApiError {
    tracing::error!(error = %err, "blocking task failed");
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({ "error": err.to_string(), "kind": "internal" }))
}

pub fn build_app(index_dir: String, config: IndexConfig) -> Result<Router> {
    let service = IndexService::open_or_create(&index_dir, config)?;
    let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    Ok(router(AppState { service: Arc::new(service), admin_token }))
}

pub fn router(app_state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/api/process", post(process_handler))
        .route("/api/autocomplete", get(autocomplete_handler))
        .route("/api/add_document", post(add_document_handler))
        .route("/doc/:offset", get(doc_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn run_search(state: &AppState, query: String, page: usize, per_page: usize) -> Result<SearchResponse, ApiError> {
    let start = std::time::Instant::now();
    let service = Arc::clone(&state.service);
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let results: SearchResults = tokio::task::spawn_blocking(move || service.search(&query, page, per_page))
        .await
        .map_err(join_error)??;
    let elapsed = start.elapsed();
    tracing::info!(query = %results.query, total = results.total_matches, took_s = elapsed.as_secs_f64(), "processed query");
    Ok(SearchResponse {
        input: results.query,
        total: results.total_matches,
        fallback: results.fallback,
        took_s: elapsed.as_secs_f64(),
        output: results.hits,
    })
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    run_search(&state, params.q, params.page, params.per_page).await.map(Json)
}

pub async fn process_handler(State(state): State<AppState>, Json(req): Json<ProcessRequest>) -> Result<Json<SearchResponse>, ApiError> {
    run_search(&state, req.query, req.page, req.per_page).await.map(Json)
}

pub async fn autocomplete_handler(State(state): State<AppState>, Query(params): Query<AutocompleteParams>) -> Json<Vec<String>> {
    Json(state.service.autocomplete(&params.prefix))
}

pub async fn doc_handler(State(state): State<AppState>, Path(offset): Path<u64>) -> Result<Json<DocumentRecord>, ApiError> {
    let service = Arc::clone(&state.service);
    let record = tokio::task::spawn_blocking(move || service.document_at(offset))
        .await
        .map_err(join_error)??;
    Ok(Json(record))
}

pub async fn add_document_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<research_core::ingest::IngestReport>, ApiError> {
    authorize(&state, &headers)?;
    let fields = match body {
        serde_json::Value::Object(map) if !map.is_empty() => map,
        _ => {
            return Err(ApiError(StatusCode::BAD_REQUEST, serde_json::json!({ "error": "No data provided", "kind": "validation" })))
        }
    };
    let service = Arc::clone(&state.service);
    let report = tokio::task::spawn_blocking(move || service.add_document(&fields))
        .await
        .map_err(join_error)??;
    Ok(Json(report))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(required) = &state.admin_token else {
        return Ok(());
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError(StatusCode::UNAUTHORIZED, serde_json::json!({ "error": "invalid admin token", "kind": "unauthorized" })))
    }
}
