#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end tests for the index build and the one-shot query path
// Models are served by a mock HTTP server and objects live in a temp directory

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use docs_rag::commands::{ask, run_indexation};
use docs_rag::config::Config;
use docs_rag::index::MetadataValue;
use docs_rag::indexer::{IndexationReport, SUCCESS_MESSAGE, perform_indexation};
use docs_rag::ingestion::TextExtractor;
use docs_rag::models::ModelClient;
use docs_rag::snapshot::download_snapshot;
use docs_rag::storage::{LocalObjectStore, ObjectStore};

const KEYWORDS: [&str; 4] = ["contract", "tax", "labor", "property"];

/// Embeds each input as keyword counts over [`KEYWORDS`]
struct KeywordEmbeddings;

impl Respond for KeywordEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("request body should be json");
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .expect("input should be an array")
            .iter()
            .map(|text| {
                let lower = text.as_str().unwrap_or_default().to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32 + 0.01)
                    .collect()
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

/// Treats archive entries as UTF-8 text with form-feed page breaks instead of parsing PDFs
struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> anyhow::Result<Vec<String>> {
        Ok(String::from_utf8(bytes.to_vec())?
            .split('\x0c')
            .map(str::to_string)
            .collect())
    }
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .expect("should start file");
        writer
            .write_all(contents.as_bytes())
            .expect("should write file");
    }
    writer.finish().expect("should finish zip").into_inner()
}

async fn model_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(KeywordEmbeddings)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "Article 5 applies.", "done": true })),
        )
        .mount(&server)
        .await;
    server
}

fn test_config(temp_dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.storage.root = temp_dir.path().to_path_buf();
    config.models.endpoint = server.uri();
    config.models.batch_size = 1;
    config.request_timeout_secs = 10;
    config
}

fn store_for(config: &Config) -> Arc<LocalObjectStore> {
    Arc::new(LocalObjectStore::new(
        &config.storage.root,
        &config.storage.bucket,
    ))
}

/// Test building the index and answering a question against it
#[tokio::test]
async fn build_then_query() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let server = model_server().await;
    let config = test_config(&temp_dir, &server);
    let store = store_for(&config);

    store
        .put(
            &config.storage.documents_key,
            zip_of(&[
                ("contratos/compra.pdf", "A contract of sale transfers property."),
                (
                    "tributos/ir.pdf",
                    "Income tax is withheld monthly.\x0cProperty tax is due yearly.",
                ),
                ("notas.txt", "ignored"),
            ]),
        )
        .await
        .expect("should upload archive");

    let client = ModelClient::new(&config.models)
        .expect("should create client")
        .with_timeout(Duration::from_secs(10));
    let report = perform_indexation(
        &config,
        store.clone(),
        Arc::new(PlainTextExtractor),
        Arc::new(client),
    )
    .await
    .expect("indexation should succeed");

    assert_eq!(
        report,
        IndexationReport {
            status: "success".to_string(),
            total_documents: 3,
            message: SUCCESS_MESSAGE.to_string(),
        }
    );

    let index = download_snapshot(store.as_ref(), &config.storage.index_folder, "legal_docs")
        .await
        .expect("snapshot should be readable");
    assert_eq!(index.size(), 3);
    assert_eq!(index.metadatas()[2]["page"], MetadataValue::from(1_i64));
    assert_eq!(index.dimension(), Some(KEYWORDS.len()));

    let outcome = ask(&config, "Does a contract transfer property?")
        .await
        .expect("should answer");

    assert_eq!(outcome.answer, "Article 5 applies.");
    assert_eq!(outcome.chunks.len(), 3);
    assert_eq!(outcome.chunks[0].text, "A contract of sale transfers property.");
    assert!(outcome.prompt.contains("Answer the question: Does a contract transfer property?"));
    assert!(
        outcome
            .prompt
            .contains(concat!(
                "A contract of sale transfers property.\n\n",
                "Property tax is due yearly.\n\n",
                "Income tax is withheld monthly."
            ))
    );
}

/// Test that the indexation handler reports a missing archive as a 500
#[tokio::test]
async fn indexation_handler_reports_missing_archive() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let server = model_server().await;
    let config = test_config(&temp_dir, &server);

    let response = run_indexation(&config).await;

    assert_eq!(response.status_code, 500);
    let message = response.body["erro"].as_str().expect("should carry erro");
    assert!(message.contains("juridicos.zip"), "unexpected message: {message}");
    assert!(!response.is_success());
}

/// Test that an archive without PDFs fails the indexation handler
#[tokio::test]
async fn indexation_handler_rejects_archive_without_pdfs() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let server = model_server().await;
    let config = test_config(&temp_dir, &server);
    store_for(&config)
        .put(
            &config.storage.documents_key,
            zip_of(&[("readme.txt", "nothing to index")]),
        )
        .await
        .expect("should upload archive");

    let response = run_indexation(&config).await;

    assert_eq!(response.status_code, 500);
    assert_eq!(
        response.to_event_response()["statusCode"],
        json!(500)
    );
}

/// Test that a query before any build fails cleanly
#[tokio::test]
async fn query_without_snapshot_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let server = model_server().await;
    let config = test_config(&temp_dir, &server);

    let result = ask(&config, "anything").await;

    assert!(result.is_err());
}
