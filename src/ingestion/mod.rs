// Document ingestion
// Turns a zip of PDFs from object storage into normalized chunk inputs


use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::index::{DEFAULT_METADATA_KEY, Metadata, MetadataValue, normalize_metadata};
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Source archive not found: {0}")]
    MissingArchive(String),
    #[error("Failed to read source archive {key}: {message}")]
    UnreadableArchive { key: String, message: String },
    #[error("No extractable text in source archive {0}")]
    NoText(String),
    #[error("Ingestion task failed: {0}")]
    Task(String),
}

/// A document handed to the indexing flow, with or without metadata
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentInput {
    Text(String),
    Document {
        text: String,
        metadata: Option<Metadata>,
    },
}

/// Text plus metadata that always carries at least the default key
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInput {
    pub text: String,
    pub metadata: Metadata,
}

impl From<DocumentInput> for ChunkInput {
    #[inline]
    fn from(input: DocumentInput) -> Self {
        match input {
            DocumentInput::Text(text) => Self {
                text,
                metadata: normalize_metadata(Metadata::new()),
            },
            DocumentInput::Document { text, metadata } => Self {
                text,
                metadata: normalize_metadata(metadata.unwrap_or_default()),
            },
        }
    }
}

impl From<String> for DocumentInput {
    #[inline]
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Normalize documents once at the ingestion boundary
#[inline]
pub fn normalize_documents<I>(documents: I) -> Vec<ChunkInput>
where
    I: IntoIterator<Item = DocumentInput>,
{
    documents.into_iter().map(ChunkInput::from).collect()
}

/// Key of the zero-based page number in page chunk metadata
pub const PAGE_METADATA_KEY: &str = "page";

/// Extracts plain text from one PDF file, one string per page
pub trait TextExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> anyhow::Result<Vec<String>>;
}

/// [`TextExtractor`] backed by `pdf-extract`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    #[inline]
    fn extract_pages(&self, bytes: &[u8]) -> anyhow::Result<Vec<String>> {
        // pdf-extract panics on some malformed files
        panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }))
        .map_err(|_| anyhow!("PDF parser panicked"))?
            .map_err(|e| anyhow!("Failed to extract PDF text: {}", e))
    }
}

fn page_metadata(source: &str, page: usize) -> Metadata {
    Metadata::from([
        (DEFAULT_METADATA_KEY.to_string(), MetadataValue::from(source)),
        (
            PAGE_METADATA_KEY.to_string(),
            MetadataValue::from(i64::try_from(page).unwrap_or(i64::MAX)),
        ),
    ])
}

fn is_pdf(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn is_resource_fork(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || Path::new(name)
            .file_name()
            .and_then(|file| file.to_str())
            .is_some_and(|file| file.starts_with("._"))
}

/// Extract one document per non-blank PDF page found in a zip archive.
///
/// PDFs that fail to extract are logged and skipped.
#[inline]
pub fn extract_documents(
    key: &str,
    archive_bytes: &[u8],
    extractor: &dyn TextExtractor,
) -> Result<Vec<ChunkInput>, IngestionError> {
    let unreadable = |e: zip::result::ZipError| IngestionError::UnreadableArchive {
        key: key.to_string(),
        message: e.to_string(),
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes)).map_err(unreadable)?;
    let mut documents = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(unreadable)?;
        let name = file.name().to_string();

        if file.is_dir() || !is_pdf(&name) {
            continue;
        }
        if is_resource_fork(&name) {
            debug!("Skipping resource fork {}", name);
            continue;
        }

        let mut bytes = Vec::new();
        if let Err(e) = file.read_to_end(&mut bytes) {
            error!("Failed to read {} from archive: {}", name, e);
            continue;
        }

        let pages = match extractor.extract_pages(&bytes) {
            Ok(pages) => pages,
            Err(e) => {
                error!("Failed to process {}: {:#}", name, e);
                continue;
            }
        };

        let total_pages = pages.len();
        let before = documents.len();
        for (page, text) in pages.into_iter().enumerate() {
            if text.trim().is_empty() {
                debug!("Skipping blank page {} of {}", page, name);
                continue;
            }
            documents.push(DocumentInput::Document {
                text,
                metadata: Some(page_metadata(&name, page)),
            });
        }

        let kept = documents.len() - before;
        if kept == 0 {
            warn!("No text extracted from {}", name);
        } else {
            info!("Processed {} ({} of {} pages with text)", name, kept, total_pages);
        }
    }

    if documents.is_empty() {
        return Err(IngestionError::NoText(key.to_string()));
    }

    Ok(normalize_documents(documents))
}

/// Download the source archive and extract its PDFs
#[inline]
pub async fn download_and_extract_documents(
    store: &dyn ObjectStore,
    key: &str,
    extractor: Arc<dyn TextExtractor>,
) -> Result<Vec<ChunkInput>, IngestionError> {
    info!("Downloading source archive {}", key);

    let bytes = store.get(key).await.map_err(|e| match e {
        StorageError::NotFound(key) => IngestionError::MissingArchive(key),
        other => IngestionError::UnreadableArchive {
            key: key.to_string(),
            message: other.to_string(),
        },
    })?;

    debug!("Downloaded {} bytes from {}", bytes.len(), key);

    let owned_key = key.to_string();
    let documents = tokio::task::spawn_blocking(move || {
        extract_documents(&owned_key, &bytes, extractor.as_ref())
    })
    .await
    .map_err(|e| IngestionError::Task(e.to_string()))??;

    info!("Extracted {} pages from {}", documents.len(), key);
    Ok(documents)
}
