//! HTTP contract tests for the embedding and reranker backends.
//!
//! Both backends run against a `wiremock` server, so no live model is needed.

use hrmatch_core::{EmbeddingBackend, Error, RerankBackend};
use hrmatch_inference::{HttpRerankBackend, OllamaBackend};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Scores each text by its length and answers in reverse order, the way a
/// TEI server returns results sorted by score rather than by input.
struct LengthScorer;

impl Respond for LengthScorer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let texts = body["texts"].as_array().unwrap();
        let scores: Vec<Value> = texts
            .iter()
            .enumerate()
            .rev()
            .map(|(i, t)| json!({"index": i, "score": t.as_str().unwrap().len() as f32}))
            .collect();
        ResponseTemplate::new(200).set_body_json(scores)
    }
}

fn texts(n: usize) -> Vec<String> {
    (1..=n).map(|i| "x".repeat(i)).collect()
}

// =============================================================================
// Reranker
// =============================================================================

#[tokio::test]
async fn test_rerank_scores_follow_input_order_across_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .and(body_partial_json(json!({"raw_scores": true, "truncate": true})))
        .respond_with(LengthScorer)
        .expect(3)
        .mount(&server)
        .await;

    let backend = HttpRerankBackend::new(server.uri(), "test-reranker").with_batch_size(4);
    let scores = backend.score_pairs("rust engineer", &texts(10)).await.unwrap();

    let expected: Vec<f32> = (1..=10).map(|i| i as f32).collect();
    assert_eq!(scores, expected);
}

#[tokio::test]
async fn test_rerank_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .mount(&server)
        .await;

    let backend = HttpRerankBackend::new(server.uri(), "test-reranker");
    let err = backend.score_pairs("q", &texts(2)).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "got {:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rerank_client_error_is_inference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(ResponseTemplate::new(422).set_body_string("input too long"))
        .mount(&server)
        .await;

    let backend = HttpRerankBackend::new(server.uri(), "test-reranker");
    let err = backend.score_pairs("q", &texts(1)).await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "got {:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rerank_count_mismatch_is_inference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"index": 0, "score": 1.0}])))
        .mount(&server)
        .await;

    let backend = HttpRerankBackend::new(server.uri(), "test-reranker");
    let err = backend.score_pairs("q", &texts(3)).await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_rerank_connection_refused_is_unavailable() {
    let backend = HttpRerankBackend::new("http://127.0.0.1:1", "test-reranker");
    let err = backend.score_pairs("q", &texts(1)).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_rerank_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let backend = HttpRerankBackend::new(server.uri(), "test-reranker");
    assert!(backend.health_check().await.unwrap());

    let down = HttpRerankBackend::new("http://127.0.0.1:1", "test-reranker");
    assert!(!down.health_check().await.unwrap());
}

// =============================================================================
// Ollama embeddings
// =============================================================================

#[tokio::test]
async fn test_ollama_embed_texts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "test-embed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-embed",
            "embeddings": [[0.1, 0.2, 0.3, 0.4], [0.4, 0.3, 0.2, 0.1]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OllamaBackend::with_config(server.uri(), "test-embed".into(), 4);
    let vectors = backend
        .embed_texts(&["resume".into(), "job".into()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[1].as_slice().to_vec(), vec![0.4f32, 0.3, 0.2, 0.1]);
}

#[tokio::test]
async fn test_ollama_wrong_dimension_is_embedding_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2]]
        })))
        .mount(&server)
        .await;

    let backend = OllamaBackend::with_config(server.uri(), "test-embed".into(), 768);
    let err = backend.embed_texts(&["resume".into()]).await.unwrap_err();
    assert!(matches!(err, Error::Embedding(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_ollama_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = OllamaBackend::with_config(server.uri(), "test-embed".into(), 4);
    let err = backend.embed_texts(&["resume".into()]).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_ollama_health_check_uses_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OllamaBackend::with_config(server.uri(), "test-embed".into(), 4);
    assert!(backend.health_check().await.unwrap());
}
