use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::config::Config;
use crate::index::DEFAULT_METADATA_KEY;
use crate::indexer::perform_indexation;
use crate::ingestion::PdfTextExtractor;
use crate::models::ModelClient;
use crate::rag::{QueryOutcome, QueryService};
use crate::storage::open_store;
use crate::telegram::{TelegramClient, WebhookError, handle_webhook};

/// Message returned for webhook events that are not a POST with a body
pub const UNRECOGNIZED_REQUEST: &str = "unrecognized request";

/// Status code and JSON body of one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HandlerResponse {
    #[inline]
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    /// Failure response with the `{"erro": message}` body
    #[inline]
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            body: json!({ "erro": message.into() }),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Gateway-style response whose body is a JSON string
    #[inline]
    pub fn to_event_response(&self) -> Value {
        json!({
            "statusCode": self.status_code,
            "body": self.body.to_string(),
        })
    }
}

fn model_client(config: &Config) -> crate::Result<Arc<ModelClient>> {
    let client = ModelClient::new(&config.models)?
        .with_timeout(Duration::from_secs(config.request_timeout_secs));
    Ok(Arc::new(client))
}

async fn query_service(config: &Config) -> crate::Result<QueryService> {
    let store = open_store(config)?;
    let client = model_client(config)?;
    let service = QueryService::initialize(config, store.as_ref(), client.clone(), client).await?;
    Ok(service)
}

async fn build_index(config: &Config) -> crate::Result<Value> {
    let store = open_store(config)?;
    let client = model_client(config)?;
    let report = perform_indexation(config, store, Arc::new(PdfTextExtractor), client).await?;
    Ok(serde_json::to_value(report).context("Failed to serialize indexation report")?)
}

/// Build the index from the source archive and export its snapshot
#[inline]
pub async fn run_indexation(config: &Config) -> HandlerResponse {
    info!("Indexation handler invoked");

    match build_index(config).await {
        Ok(report) => {
            info!("Indexation succeeded, returning 200");
            HandlerResponse::ok(report)
        }
        Err(e) => {
            error!("Indexation failed: {}", e);
            HandlerResponse::error(500, e.to_string())
        }
    }
}

/// Handle one chat webhook event
#[inline]
pub async fn handle_telegram_event(config: &Config, event: &Value) -> HandlerResponse {
    let transport = match TelegramClient::from_config(&config.telegram) {
        Ok(client) => client.with_timeout(Duration::from_secs(config.request_timeout_secs)),
        Err(e) => {
            error!("Cannot handle webhook: {}", e);
            return HandlerResponse::error(500, e.to_string());
        }
    };

    let service = match query_service(config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize query service: {}", e);
            return HandlerResponse::error(500, e.to_string());
        }
    };

    match handle_webhook(event, &service, &transport).await {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(body) => HandlerResponse::ok(body),
            Err(e) => HandlerResponse::error(500, e.to_string()),
        },
        Err(WebhookError::UnrecognizedRequest) => {
            HandlerResponse::error(400, UNRECOGNIZED_REQUEST)
        }
        Err(e) => HandlerResponse::error(400, e.to_string()),
    }
}

/// Answer one question against the exported index
#[inline]
pub async fn ask(config: &Config, question: &str) -> crate::Result<QueryOutcome> {
    let service = query_service(config).await?;
    let outcome = service.ask(question).await?;

    println!("{}", outcome.answer.trim());
    if !outcome.chunks.is_empty() {
        println!();
        println!("Sources:");
        for chunk in &outcome.chunks {
            let source = chunk
                .metadata
                .get(DEFAULT_METADATA_KEY)
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("  {} {} ({:.3})", chunk.id, source, chunk.similarity);
        }
    }

    Ok(outcome)
}

/// Verify the model endpoint serves both configured models
#[inline]
pub async fn check_models(config: &Config) -> crate::Result<()> {
    let client = ModelClient::new(&config.models)?
        .with_timeout(Duration::from_secs(config.request_timeout_secs));

    let models = tokio::task::spawn_blocking(move || {
        client.health_check()?;
        client.list_models()
    })
    .await
    .context("Health check task failed")??;

    println!("Model endpoint {} is healthy", config.models.endpoint);
    println!("  Embedding model: {}", config.models.embedding_model);
    println!("  Generation model: {}", config.models.generation_model);
    println!("  {} models available", models.len());

    Ok(())
}
