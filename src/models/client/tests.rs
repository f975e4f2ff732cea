use super::*;
use serde_json::json;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

/// Answers `/api/embed` with `[text length, position in batch]` per input
struct EchoEmbeddings;

impl Respond for EchoEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("request body should be json");
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .expect("input should be an array")
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let len = text.as_str().map_or(0, str::len);
                vec![len as f32, i as f32]
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn client_for(server: &MockServer, batch_size: u32) -> ModelClient {
    let config = ModelConfig {
        endpoint: server.uri(),
        embedding_model: "embed-model".to_string(),
        generation_model: "text-model".to_string(),
        batch_size,
        temperature: 0.7,
    };
    ModelClient::new(&config)
        .expect("should create client")
        .with_timeout(Duration::from_secs(5))
        .with_retry_delay(Duration::ZERO)
}

#[test]
fn client_configuration() {
    let config = ModelConfig {
        endpoint: "http://test-host:1234".to_string(),
        embedding_model: "embed-model".to_string(),
        generation_model: "text-model".to_string(),
        batch_size: 128,
        temperature: 0.2,
    };
    let client = ModelClient::new(&config).expect("should create client");

    assert_eq!(client.embedding_model, "embed-model");
    assert_eq!(client.generation_model, "text-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = ModelClient::new(&ModelConfig::default())
        .expect("should create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5)
        .with_retry_delay(Duration::from_millis(10));

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.retry_delay, Duration::from_millis(10));
}

#[test]
fn invalid_endpoint_is_rejected() {
    let config = ModelConfig {
        endpoint: "not a url".to_string(),
        ..ModelConfig::default()
    };

    assert!(ModelClient::new(&config).is_err());
}

#[tokio::test]
async fn embeddings_keep_input_order_across_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "embed-model" })))
        .respond_with(EchoEmbeddings)
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
        .iter()
        .map(|t| (*t).to_string())
        .collect();

    let vectors = client
        .embed_documents(&texts)
        .await
        .expect("should embed texts");

    assert_eq!(vectors.len(), texts.len());
    for (text, vector) in texts.iter().zip(&vectors) {
        assert_eq!(vector[0], text.len() as f32);
    }
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(EchoEmbeddings)
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, 4);

    let vectors = client.embed_documents(&[]).await.expect("should succeed");

    assert!(vectors.is_empty());
}

#[tokio::test]
async fn embed_query_returns_single_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EchoEmbeddings)
        .mount(&server)
        .await;

    let client = client_for(&server, 4);

    let vector = client
        .embed_query("what is a contract?")
        .await
        .expect("should embed query");

    assert_eq!(vector, [19.0, 0.0]);
}

#[tokio::test]
async fn response_count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 2.0]] })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let texts = vec!["one".to_string(), "two".to_string()];

    let result = client.embed_documents(&texts).await;

    assert!(matches!(result, Err(EmbeddingError::Request(_))));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 8).with_retry_attempts(3);

    let result = client.embed_query("question").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, 8).with_retry_attempts(2);

    let result = client.generate("prompt").await;

    assert!(matches!(result, Err(GenerationError::Request(_))));
}

#[tokio::test]
async fn generation_returns_response_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "text-model",
            "prompt": "Context: x\n\nQuestion: y",
            "stream": false
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "  The answer.\n", "done": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 8);

    let answer = client
        .generate("Context: x\n\nQuestion: y")
        .await
        .expect("should generate");

    assert_eq!(answer, "  The answer.\n");
}

#[tokio::test]
async fn health_check_requires_both_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "embed-model" }, { "name": "text-model", "size": 42 }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let healthy = tokio::task::spawn_blocking(move || client.health_check().is_ok())
        .await
        .expect("task should finish");
    assert!(healthy);

    let config = ModelConfig {
        endpoint: server.uri(),
        embedding_model: "embed-model".to_string(),
        generation_model: "missing-model".to_string(),
        ..ModelConfig::default()
    };
    let client = ModelClient::new(&config).expect("should create client");
    let healthy = tokio::task::spawn_blocking(move || client.health_check().is_ok())
        .await
        .expect("task should finish");
    assert!(!healthy);
}

#[tokio::test]
async fn provider_timeout_maps_to_embedding_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "embeddings": [[1.0]] }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 8);

    let result = crate::models::embed_within(
        Duration::from_millis(50),
        client.embed_query("slow question"),
    )
    .await;

    assert!(matches!(result, Err(EmbeddingError::Timeout(_))));
}
