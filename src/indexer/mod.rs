// Indexer module
// Builds the vector index from the source archive and exports its snapshot


use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::index::VectorIndex;
use crate::ingestion::{ChunkInput, TextExtractor, download_and_extract_documents};
use crate::models::{EmbeddingProvider, embed_within};
use crate::snapshot::upload_snapshot;
use crate::storage::ObjectStore;

pub const SUCCESS_STATUS: &str = "success";
pub const SUCCESS_MESSAGE: &str =
    "Embeddings were generated and the index was exported successfully";

/// Summary returned by a successful index build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexationReport {
    pub status: String,
    pub total_documents: usize,
    pub message: String,
}

impl IndexationReport {
    fn success(total_documents: usize) -> Self {
        Self {
            status: SUCCESS_STATUS.to_string(),
            total_documents,
            message: SUCCESS_MESSAGE.to_string(),
        }
    }
}

/// Stage of an index build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Idle,
    Extracting,
    Embedding { documents: usize },
    Indexing,
    Uploading,
    Done { total_documents: usize },
    Failed { error: String },
}

/// Runs the extract, embed, index and export pipeline once
pub struct Indexer {
    store: Arc<dyn ObjectStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    documents_key: String,
    index_folder: String,
    collection_name: String,
    batch_size: usize,
    timeout: Duration,
    status: BuildStatus,
}

impl Indexer {
    #[inline]
    pub fn new(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            extractor,
            embedder,
            documents_key: config.storage.documents_key.clone(),
            index_folder: config.storage.index_folder.clone(),
            collection_name: config.retrieval.collection_name.clone(),
            batch_size: (config.models.batch_size as usize).max(1),
            timeout: Duration::from_secs(config.request_timeout_secs),
            status: BuildStatus::Idle,
        }
    }

    #[inline]
    pub fn status(&self) -> &BuildStatus {
        &self.status
    }

    fn set_status(&mut self, status: BuildStatus) {
        debug!("Indexer status: {:?}", status);
        self.status = status;
    }

    /// Run the whole pipeline, recording the failure in [`Self::status`]
    #[inline]
    pub async fn run(&mut self) -> crate::Result<IndexationReport> {
        info!("Starting indexation of {}", self.documents_key);

        match self.run_stages().await {
            Ok(report) => {
                self.set_status(BuildStatus::Done {
                    total_documents: report.total_documents,
                });
                info!(
                    "Indexation finished with {} documents",
                    report.total_documents
                );
                Ok(report)
            }
            Err(e) => {
                error!("Indexation failed: {}", e);
                self.set_status(BuildStatus::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> crate::Result<IndexationReport> {
        self.set_status(BuildStatus::Extracting);
        let chunks = download_and_extract_documents(
            self.store.as_ref(),
            &self.documents_key,
            Arc::clone(&self.extractor),
        )
        .await?;
        info!("Extracted {} documents", chunks.len());

        let total_documents = chunks.len();
        let index = self.build_index(chunks).await?;

        self.set_status(BuildStatus::Uploading);
        upload_snapshot(self.store.as_ref(), &self.index_folder, &index).await?;

        Ok(IndexationReport::success(total_documents))
    }

    /// Embed normalized chunks and build an index from them
    #[inline]
    pub async fn build_index(&mut self, chunks: Vec<ChunkInput>) -> crate::Result<VectorIndex> {
        self.set_status(BuildStatus::Embedding {
            documents: chunks.len(),
        });

        let (texts, metadatas): (Vec<String>, Vec<_>) = chunks
            .into_iter()
            .map(|chunk| (chunk.text, chunk.metadata))
            .unzip();

        // The deadline grows with the number of provider batches
        let batches = u32::try_from(texts.len().div_ceil(self.batch_size)).unwrap_or(u32::MAX);
        let deadline = self.timeout.saturating_mul(batches.max(1));
        let vectors = embed_within(deadline, self.embedder.embed_documents(&texts)).await?;

        self.set_status(BuildStatus::Indexing);
        let index = VectorIndex::build(self.collection_name.as_str(), texts, metadatas, vectors)?;
        info!(
            "Built index {} with {} chunks of dimension {:?}",
            index.name(),
            index.size(),
            index.dimension()
        );

        Ok(index)
    }
}

/// Build the index from the configured source archive and upload its snapshot
#[inline]
pub async fn perform_indexation(
    config: &Config,
    store: Arc<dyn ObjectStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> crate::Result<IndexationReport> {
    Indexer::new(config, store, extractor, embedder).run().await
}
