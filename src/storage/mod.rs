// Object storage
// Opaque blob get/put against a local bucket directory or an S3-compatible HTTP gateway


use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::{Config, StorageBackend};

/// Upper bound on the size of a downloaded object
const MAX_OBJECT_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Storage IO error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Storage request failed for {key}: {message}")]
    Http { key: String, message: String },
}

/// A bucket of opaque blobs addressed by key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download the whole object stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Upload `bytes` under `key`, replacing any previous object
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;
}

/// Build the store selected by the configuration
#[inline]
pub fn open_store(config: &Config) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Local => {
            info!(
                "Using local object storage at {} (bucket {})",
                storage.root.display(),
                storage.bucket
            );
            Ok(Arc::new(LocalObjectStore::new(&storage.root, &storage.bucket)))
        }
        StorageBackend::Http => {
            let endpoint = storage.endpoint.as_deref().unwrap_or_default();
            let endpoint = Url::parse(endpoint).map_err(|e| StorageError::Http {
                key: String::new(),
                message: format!("Invalid storage endpoint '{}': {}", endpoint, e),
            })?;
            info!(
                "Using HTTP object storage at {} (bucket {})",
                endpoint, storage.bucket
            );
            Ok(Arc::new(
                HttpObjectStore::new(endpoint, &storage.bucket)
                    .with_timeout(Duration::from_secs(config.request_timeout_secs)),
            ))
        }
    }
}

fn validate_key(key: &str) -> Result<&Path, StorageError> {
    let path = Path::new(key);
    let is_relative_and_plain = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if is_relative_and_plain {
        Ok(path)
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Bucket backed by a directory: objects live at `<root>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket_dir: PathBuf,
}

impl LocalObjectStore {
    #[inline]
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_dir: root.as_ref().join(bucket),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.bucket_dir.join(validate_key(key)?))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        debug!("Reading object {}", path.display());

        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let io_error = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        debug!("Writing {} bytes to {}", bytes.len(), path.display());
        tokio::fs::write(&path, bytes).await.map_err(io_error)
    }
}

/// Path-style S3-compatible gateway: objects live at `<endpoint>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    endpoint: Url,
    bucket: String,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    #[inline]
    pub fn new(endpoint: Url, bucket: &str) -> Self {
        Self {
            endpoint,
            bucket: bucket.to_string(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        validate_key(key)?;
        let base = self.endpoint.as_str().trim_end_matches('/');
        let url = format!("{}/{}/{}", base, self.bucket, key);
        Url::parse(&url).map_err(|_| StorageError::InvalidKey(key.to_string()))
    }
}

fn http_error(key: &str, error: &ureq::Error) -> StorageError {
    match error {
        ureq::Error::StatusCode(404) => StorageError::NotFound(key.to_string()),
        other => StorageError::Http {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

fn join_error(key: &str, error: &tokio::task::JoinError) -> StorageError {
    StorageError::Http {
        key: key.to_string(),
        message: format!("Storage task failed: {}", error),
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(key)?;
        let agent = self.agent.clone();
        debug!("GET {}", url);

        let response = tokio::task::spawn_blocking(move || {
            agent.get(url.as_str()).call().and_then(|mut resp| {
                resp.body_mut()
                    .with_config()
                    .limit(MAX_OBJECT_BYTES)
                    .read_to_vec()
            })
        })
        .await
        .map_err(|e| join_error(key, &e))?;

        response.map_err(|e| http_error(key, &e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let url = self.object_url(key)?;
        let agent = self.agent.clone();
        debug!("PUT {} ({} bytes)", url, bytes.len());

        let response = tokio::task::spawn_blocking(move || {
            agent
                .put(url.as_str())
                .header("Content-Type", "application/octet-stream")
                .send(bytes.as_slice())
                .map(|_| ())
        })
        .await
        .map_err(|e| join_error(key, &e))?;

        response.map_err(|e| http_error(key, &e))
    }
}
