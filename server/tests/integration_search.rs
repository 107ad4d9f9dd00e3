use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use engine::build::{build_collection, build_vocabulary};
use engine::embedding::{EmbeddingProvider, HashEmbedder};
use engine::expansion::QueryExpander;
use engine::persist::{load_vocabulary, IndexPaths};
use engine::rag::ChatModel;
use engine::store::DocumentStore;
use engine::{EngineConfig, SearchEngine};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server::{router, AppState};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct CannedChat;

#[async_trait]
impl ChatModel for CannedChat {
    async fn complete(&self, _prompt: &str) -> engine::Result<String> {
        Ok("Cats purr when content.".to_string())
    }
}

async fn build_tiny_index(dir: &std::path::Path, store: &DocumentStore, embedder: &HashEmbedder) {
    let paths = IndexPaths::new(dir);
    let antique = vec![
        ("a1".to_string(), "Why do cats purr?".to_string()),
        ("a2".to_string(), "Rust is a systems programming language.".to_string()),
        ("a3".to_string(), "Learning rust takes practice.".to_string()),
    ];
    let quora = vec![("q1".to_string(), "How can I learn systems programming?".to_string())];
    build_collection(&paths, store, "antique", antique, Some(embedder), 8).await.unwrap();
    build_collection(&paths, store, "quora", quora, Some(embedder), 8).await.unwrap();
    let collections = vec!["antique".to_string(), "quora".to_string()];
    build_vocabulary(&paths, store, &collections, embedder, 8).await.unwrap();
}

async fn app(chat: bool) -> (TempDir, Router) {
    let dir = tempdir().unwrap();
    let store = DocumentStore::temporary().unwrap();
    let embedder = HashEmbedder::new(256);
    build_tiny_index(dir.path(), &store, &embedder).await;

    let paths = IndexPaths::new(dir.path());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(embedder);
    let config = EngineConfig::default();
    let vocabulary = load_vocabulary(&paths).ok().map(Arc::new);
    let expander = QueryExpander::new(Some(embedder.clone()), vocabulary, config.expansion.clone());
    let engine = SearchEngine::new(paths, store, Some(embedder), expander, config);
    let chat: Option<Arc<dyn ChatModel>> = if chat { Some(Arc::new(CannedChat)) } else { None };
    (dir, router(AppState { engine: Arc::new(engine), chat }))
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, bytes) = call(app, req).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_is_ok() {
    let (_dir, app) = app(false).await;
    let (status, body) = call(app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let (_dir, app) = app(false).await;
    let (status, json) = post(app, "/api/search/bm25", json!({"query": "rust", "dataset": "antique"})).await;
    assert_eq!(status, StatusCode::OK);
    let arr = json.as_array().unwrap();
    assert_eq!(arr.len(), 3);
    let top = arr[0]["doc_id"].as_str().unwrap();
    assert!(top == "a2" || top == "a3");
    assert!(arr[0]["doc_text"].as_str().unwrap().to_lowercase().contains("rust"));
    let scores: Vec<f64> = arr.iter().map(|h| h["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn every_method_and_alias_answers() {
    let (_dir, app) = app(false).await;
    for method in ["tfidf", "bm25", "dense", "bert", "hybrid"] {
        let uri = format!("/api/search/{method}");
        let (status, json) = post(app.clone(), &uri, json!({"query": "systems programming", "dataset": "antique"})).await;
        assert_eq!(status, StatusCode::OK, "{method}");
        assert!(json.as_array().unwrap().len() <= 10);
    }
}

#[tokio::test]
async fn search_with_expansion() {
    let (_dir, app) = app(false).await;
    let (status, json) =
        post(app, "/api/search/tfidf", json!({"query": "cats", "dataset": "antique", "expand": true})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["doc_id"], "a1");
}

#[tokio::test]
async fn unbuilt_dataset_is_not_found() {
    let (_dir, app) = app(false).await;
    let (status, json) = post(app, "/api/search/dense", json!({"query": "test", "dataset": "unbuilt_collection"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["detail"].as_str().unwrap().contains("unbuilt_collection"));
}

#[tokio::test]
async fn hybrid_on_unbuilt_dataset_is_unavailable() {
    let (_dir, app) = app(false).await;
    let (status, _) = post(app, "/api/search/hybrid", json!({"query": "test", "dataset": "nothing_here"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let (_dir, app) = app(false).await;
    let (status, _) = post(app.clone(), "/api/search/lsi", json!({"query": "x", "dataset": "antique"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = "a".repeat(101);
    let (status, json) = post(app.clone(), "/api/search/tfidf", json!({"query": long, "dataset": "antique"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].is_string());

    let (status, _) = post(app.clone(), "/api/search/tfidf", json!({"query": "", "dataset": "antique"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post(app, "/api/search/tfidf", json!({"dataset": "antique"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn refine_query_keeps_original() {
    let (_dir, app) = app(false).await;
    let (status, json) = post(app, "/api/refineQuery/", json!({"query": "Learning Rust"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["original_query"], "Learning Rust");
    let expanded = json["expanded_query"].as_str().unwrap();
    assert!(expanded.starts_with("learning rust"));
}

#[tokio::test]
async fn chat_uses_both_collections() {
    let (_dir, app) = app(true).await;
    let (status, json) = post(app, "/api/chat/", json!({"question": "why do cats purr"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["answer"], "Cats purr when content.");
    let sources = json["sources"].as_array().unwrap();
    // two from antique, one from quora
    assert_eq!(sources.len(), 3);
    assert_eq!(sources[0]["doc_id"], "a1");
}

#[tokio::test]
async fn chat_without_backend_is_unavailable() {
    let (_dir, app) = app(false).await;
    let (status, json) = post(app, "/api/chat/", json!({"question": "hello"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["detail"], "no chat backend configured");
}
