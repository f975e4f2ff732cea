// Index snapshot codec
// Serializes a vector index to a single-entry tar.gz archive and back


use std::io::Read;
use std::path::Path;

use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::index::{IndexError, Metadata, VectorIndex, default_metadata};
use crate::storage::{ObjectStore, StorageError};

/// Name of the JSON document inside the archive
pub const SNAPSHOT_ENTRY_NAME: &str = "index.json";
/// File name of the archive inside the index folder
pub const SNAPSHOT_FILE_NAME: &str = "index.tar.gz";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Corrupt snapshot archive: {0}")]
    CorruptArchive(String),
    #[error("Corrupt snapshot index: {0}")]
    CorruptIndex(String),
    #[error("Failed to encode snapshot: {0}")]
    Encode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<IndexError> for SnapshotError {
    #[inline]
    fn from(error: IndexError) -> Self {
        Self::CorruptIndex(error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct SnapshotDocumentRef<'a> {
    ids: &'a [String],
    embeddings: &'a [Vec<f32>],
    metadatas: &'a [Metadata],
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    metadatas: Vec<Option<Metadata>>,
    documents: Vec<String>,
}

/// Object key of the snapshot stored under `index_folder`
#[inline]
pub fn snapshot_key(index_folder: &str) -> String {
    let folder = index_folder.trim_end_matches('/');
    if folder.is_empty() {
        SNAPSHOT_FILE_NAME.to_string()
    } else {
        format!("{}/{}", folder, SNAPSHOT_FILE_NAME)
    }
}

/// Encode the full index contents as a gzip-compressed tar archive
#[inline]
pub fn encode(index: &VectorIndex) -> Result<Vec<u8>, SnapshotError> {
    let document = SnapshotDocumentRef {
        ids: index.ids(),
        embeddings: index.vectors(),
        metadatas: index.metadatas(),
        documents: index.texts(),
    };

    let json = serde_json::to_vec(&document)
        .map_err(|e| SnapshotError::Encode(format!("Failed to serialize index: {}", e)))?;

    let mut header = tar::Header::new_gnu();
    header.set_size(json.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(u64::try_from(Utc::now().timestamp()).unwrap_or_default());

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder
        .append_data(&mut header, SNAPSHOT_ENTRY_NAME, json.as_slice())
        .map_err(|e| SnapshotError::Encode(format!("Failed to write archive entry: {}", e)))?;

    let bytes = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| SnapshotError::Encode(format!("Failed to finish archive: {}", e)))?;

    debug!(
        "Encoded {} chunks into {} byte snapshot ({} bytes uncompressed)",
        index.size(),
        bytes.len(),
        json.len()
    );
    Ok(bytes)
}

/// Decode a snapshot archive into an index named `name`
#[inline]
pub fn decode(bytes: &[u8], name: &str) -> Result<VectorIndex, SnapshotError> {
    let json = read_snapshot_entry(bytes)?;

    let document: SnapshotDocument = serde_json::from_slice(&json)
        .map_err(|e| SnapshotError::CorruptIndex(format!("Invalid index document: {}", e)))?;

    let metadatas = document
        .metadatas
        .into_iter()
        .map(|metadata| metadata.unwrap_or_else(default_metadata))
        .collect();

    let mut index = VectorIndex::new(name);
    index.load(
        document.ids,
        document.embeddings,
        metadatas,
        document.documents,
    )?;

    debug!("Decoded snapshot with {} chunks", index.size());
    Ok(index)
}

fn read_snapshot_entry(bytes: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let corrupt = |e: std::io::Error| SnapshotError::CorruptArchive(e.to_string());

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let is_snapshot = entry
            .path()
            .map_err(corrupt)?
            .file_name()
            .is_some_and(|name| Path::new(name) == Path::new(SNAPSHOT_ENTRY_NAME));

        if is_snapshot {
            let mut json = Vec::new();
            entry.read_to_end(&mut json).map_err(corrupt)?;
            return Ok(json);
        }
    }

    Err(SnapshotError::CorruptArchive(format!(
        "archive does not contain {}",
        SNAPSHOT_ENTRY_NAME
    )))
}

/// Encode `index` and upload it to `<index_folder>/index.tar.gz`
#[inline]
pub async fn upload_snapshot(
    store: &dyn ObjectStore,
    index_folder: &str,
    index: &VectorIndex,
) -> Result<String, SnapshotError> {
    let bytes = encode(index)?;
    let key = snapshot_key(index_folder);

    store.put(&key, bytes).await.inspect_err(|e| {
        error!("Failed to upload snapshot to {}: {}", key, e);
    })?;

    info!("Snapshot saved to {}", key);
    Ok(key)
}

/// Download `<index_folder>/index.tar.gz` and decode it
#[inline]
pub async fn download_snapshot(
    store: &dyn ObjectStore,
    index_folder: &str,
    name: &str,
) -> Result<VectorIndex, SnapshotError> {
    let key = snapshot_key(index_folder);
    info!("Downloading snapshot from {}", key);

    let bytes = store.get(&key).await.inspect_err(|e| {
        error!("Failed to download snapshot {}: {}", key, e);
    })?;

    decode(&bytes, name).inspect_err(|e| error!("Failed to decode snapshot {}: {}", key, e))
}
