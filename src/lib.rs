use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Ingestion error: {0}")]
    Ingestion(#[from] ingestion::IngestionError),

    #[error("Index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] snapshot::SnapshotError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] models::EmbeddingError),

    #[error("Generation error: {0}")]
    Generation(#[from] models::GenerationError),

    #[error("Query error: {0}")]
    Query(#[from] rag::QueryError),

    #[error("Initialization error: {0}")]
    Init(#[from] rag::InitError),

    #[error("Transport error: {0}")]
    Transport(#[from] telegram::TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod index;
pub mod indexer;
pub mod ingestion;
pub mod models;
pub mod rag;
pub mod snapshot;
pub mod storage;
pub mod telegram;
