use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use engine::rag::{ChatModel, RagAnswer};
use engine::{EngineConfig, EngineError, Method, SearchEngine, SearchHit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod chat;

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 100;

#[derive(Deserialize)]
pub struct RefineQueryRequest {
    pub query: String,
}

#[derive(Serialize)]
pub struct RefineQueryResponse {
    pub original_query: String,
    pub expanded_query: String,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Collection name
    pub dataset: String,
    /// Expand the query before searching.
    #[serde(default)]
    pub expand: bool,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub chat: Option<Arc<dyn ChatModel>>,
}

/// Error body: `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self { status, detail: detail.into() }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::IndexNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::UnknownMethod(_) | EngineError::InvalidCollection(_) => StatusCode::BAD_REQUEST,
            EngineError::EmbeddingUnavailable(_)
            | EngineError::UpstreamTimeout { .. }
            | EngineError::AllMethodsFailed { .. }
            | EngineError::Chat(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

fn validate_query(query: &str) -> Result<(), ApiError> {
    let n = query.chars().count();
    if n == 0 || n > MAX_QUERY_CHARS {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("query must be between 1 and {MAX_QUERY_CHARS} characters, got {n}"),
        ));
    }
    Ok(())
}

/// Open the index directory and build the router.
pub fn build_app(index_dir: String, config: EngineConfig, chat: Option<Arc<dyn ChatModel>>) -> Result<Router> {
    let engine = SearchEngine::open(&index_dir, config)?;
    Ok(router(AppState { engine: Arc::new(engine), chat }))
}

fn cors_layer() -> CorsLayer {
    // CORS_ALLOW_ORIGIN is comma-separated; any origin when unset or unparsable
    let origins: Vec<HeaderValue> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/refineQuery/", post(refine_query))
        .route("/api/refineQuery", post(refine_query))
        .route("/api/search/:method", post(search_handler))
        .route("/api/chat/", post(chat_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

pub async fn refine_query(
    State(state): State<AppState>,
    payload: Result<Json<RefineQueryRequest>, JsonRejection>,
) -> Result<Json<RefineQueryResponse>, ApiError> {
    let Json(req) = payload?;
    validate_query(&req.query)?;
    let expanded = state.engine.expand_query(&req.query).await;
    tracing::info!(original = %expanded.original, expanded = %expanded.expanded, "refined query");
    Ok(Json(RefineQueryResponse { original_query: expanded.original, expanded_query: expanded.expanded }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let Json(req) = payload?;
    let method: Method = method.parse()?;
    validate_query(&req.query)?;

    let start = std::time::Instant::now();
    let query = if req.expand { state.engine.expand_query(&req.query).await.expanded } else { req.query };
    let hits = state.engine.search(method, &req.dataset, &query).await?;
    tracing::info!(
        %method,
        dataset = %req.dataset,
        query = %query,
        hits = hits.len(),
        took_s = start.elapsed().as_secs_f64(),
        "search"
    );
    Ok(Json(hits))
}

pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<RagAnswer>, ApiError> {
    let Json(req) = payload?;
    if req.question.trim().is_empty() {
        return Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "question must not be empty"));
    }
    let Some(chat) = state.chat.as_ref() else {
        return Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "no chat backend configured"));
    };
    let answer = state.engine.answer(&**chat, &req.question).await?;
    Ok(Json(answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let e: ApiError = EngineError::IndexNotFound { method: Method::Dense, collection: "x".into() }.into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        let e: ApiError = EngineError::UnknownMethod("lsi".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        let e: ApiError = EngineError::AllMethodsFailed { collection: "x".into(), failures: vec![] }.into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        let e: ApiError = EngineError::Config("bad".into()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn query_length_bounds() {
        assert!(validate_query("a").is_ok());
        assert!(validate_query(&"é".repeat(100)).is_ok());
        assert_eq!(validate_query("").unwrap_err().status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(validate_query(&"a".repeat(101)).is_err());
    }
}
