use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use research_core::{IndexConfig, IndexService};
use serde_json::{json, Value};
use server::{router, AppState};
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

fn tiny_service(dir: &std::path::Path) -> Arc<IndexService> {
    let config = IndexConfig { barrel_count: 5, fallback: vec![(0, 0)], ..IndexConfig::default() };
    let service = IndexService::create(dir, config).unwrap();
    for (title, abstract_text) in [
        ("Quantum Entanglement", "A study of quantum entanglement phenomena"),
        ("Rust systems", "Memory safety without garbage collection"),
    ] {
        let doc = json!({
            "title": title,
            "abstract": abstract_text,
            "keywords": "physics,quantum",
            "year": 2024,
            "n_citation": 1,
            "url": "http://example.org"
        });
        service.add_document(doc.as_object().unwrap()).unwrap();
    }
    Arc::new(service)
}

fn app(service: Arc<IndexService>, admin_token: Option<&str>) -> Router {
    router(AppState { service, admin_token: admin_token.map(String::from) })
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn search_returns_ranked_records() {
    let dir = tempdir().unwrap();
    let service = tiny_service(dir.path());

    let (status, json) = call(app(service, None), get("/search?q=entanglement")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["input"], "entanglement");
    assert_eq!(json["total"], 1);
    assert_eq!(json["fallback"], false);
    let output = json["output"].as_array().unwrap();
    assert_eq!(output.len(), 1);
    assert_eq!(output[0]["doc_id"], 0);
    assert_eq!(output[0]["title"], "Quantum Entanglement");
    assert_eq!(output[0]["abstract"], "A study of quantum entanglement phenomena");
}

#[tokio::test]
async fn process_paginates_and_falls_back() {
    let dir = tempdir().unwrap();
    let service = tiny_service(dir.path());

    let (status, json) = call(app(service.clone(), None), post_json("/api/process", json!({ "query": "quantum", "per_page": 1, "page": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["output"].as_array().unwrap().len(), 1);

    let (status, json) = call(app(service, None), post_json("/api/process", json!({ "query": "zebra" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fallback"], true);
    assert_eq!(json["output"][0]["title"], "Quantum Entanglement");
}

#[tokio::test]
async fn autocomplete_and_document_lookup() {
    let dir = tempdir().unwrap();
    let service = tiny_service(dir.path());

    let (status, json) = call(app(service.clone(), None), get("/api/autocomplete?prefix=Qu")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!(["quantum"]));

    let (status, json) = call(app(service, None), get("/doc/0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], "Quantum Entanglement");
}

#[tokio::test]
async fn add_document_validates_and_indexes() {
    let dir = tempdir().unwrap();
    let service = tiny_service(dir.path());

    let (status, json) = call(app(service.clone(), None), post_json("/api/add_document", json!({ "title": "only a title" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    let doc = json!({
        "title": "Topological qubits",
        "abstract": "Braiding anyons",
        "keywords": ["quantum", "topology"],
        "year": 2023,
        "n_citation": 4,
        "url": "http://example.org/t"
    });
    let (status, json) = call(app(service.clone(), None), post_json("/api/add_document", doc)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Document added successfully");
    assert!(json["time_taken"].as_f64().unwrap() >= 0.0);

    let (_, json) = call(app(service, None), get("/search?q=anyons")).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["output"][0]["doc_id"], 2);
}

#[tokio::test]
async fn add_document_requires_admin_token_when_configured() {
    let dir = tempdir().unwrap();
    let service = tiny_service(dir.path());
    let doc = json!({
        "title": "Guarded",
        "abstract": "Needs a token",
        "keywords": "auth",
        "year": 2020,
        "n_citation": 0,
        "url": "http://example.org/g"
    });

    let (status, _) = call(app(service.clone(), Some("secret")), post_json("/api/add_document", doc.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut req = post_json("/api/add_document", doc);
    req.headers_mut().insert("X-ADMIN-TOKEN", "secret".parse().unwrap());
    let (status, _) = call(app(service, Some("secret")), req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    let service = tiny_service(dir.path());
    let resp = app(service, None).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
