#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub const ENV_BUCKET_NAME: &str = "S3_BUCKET_NAME";
pub const ENV_DOCUMENTS_KEY: &str = "S3_DOCUMENTS_KEY";
pub const ENV_INDEX_FOLDER: &str = "S3_INDEX_FOLDER";
pub const ENV_STORAGE_ENDPOINT: &str = "STORAGE_ENDPOINT";
pub const ENV_STORAGE_ROOT: &str = "STORAGE_ROOT";
pub const ENV_STORAGE_BACKEND: &str = "STORAGE_BACKEND";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_MODEL_ENDPOINT: &str = "MODEL_ENDPOINT";
pub const ENV_EMBEDDING_MODEL: &str = "EMBEDDING_MODEL";
pub const ENV_GENERATION_MODEL: &str = "GENERATION_MODEL";

pub const CONTEXT_SLOT: &str = "{context}";
pub const QUESTION_SLOT: &str = "{question}";

const DEFAULT_PROMPT_TEMPLATE: &str =
    "Based on the following context:\n\n{context}\n\nAnswer the question: {question}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub models: ModelConfig,
    pub telegram: TelegramConfig,
    pub retrieval: RetrievalConfig,
    /// Caller-imposed timeout for every external call, in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            models: ModelConfig::default(),
            telegram: TelegramConfig::default(),
            retrieval: RetrievalConfig::default(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Http,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    #[inline]
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "http" => Ok(Self::Http),
            _ => Err(ConfigError::InvalidBackend(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    /// Directory holding local buckets
    pub root: PathBuf,
    /// Base URL of the S3-compatible gateway for the HTTP backend
    pub endpoint: Option<String>,
    /// Key of the zip archive with the source PDFs
    pub documents_key: String,
    /// Folder that receives `index.tar.gz`
    pub index_folder: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            bucket: "docs-rag".to_string(),
            root: dirs::data_dir()
                .map(|dir| dir.join("docs-rag"))
                .unwrap_or_else(|| PathBuf::from("storage")),
            endpoint: None,
            documents_key: "juridicos.zip".to_string(),
            index_folder: "chroma_index".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the hosted model API
    pub endpoint: String,
    pub embedding_model: String,
    pub generation_model: String,
    pub batch_size: u32,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text:latest".to_string(),
            generation_model: "llama3.2:latest".to_string(),
            batch_size: 16,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub collection_name: String,
    /// Prompt with `{context}` and `{question}` slots
    pub prompt_template: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            collection_name: "legal_docs".to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    MissingFile(PathBuf),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid storage backend: {0} (must be 'local' or 'http')")]
    InvalidBackend(String),
    #[error("Storage endpoint is required for the http backend")]
    MissingStorageEndpoint,
    #[error("Bucket name cannot be empty")]
    EmptyBucket,
    #[error("Object key cannot be empty: {0}")]
    EmptyKey(&'static str),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid request timeout: {0} (must be between 1 and 900 seconds)")]
    InvalidTimeout(u64),
    #[error("TELEGRAM_BOT_TOKEN is not configured")]
    MissingBotToken,
    #[error("Prompt template is missing the {0} slot")]
    InvalidPromptTemplate(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Directory of the default configuration file
    #[inline]
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docs-rag"))
    }

    /// Load from `path` (or the default location when present), apply
    /// environment overrides and validate
    #[inline]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            Some(path) => Self::from_file(path)?,
            None => match Self::config_dir().map(|dir| dir.join("config.toml")) {
                Some(default_path) if default_path.exists() => Self::from_file(&default_path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    #[inline]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override fields from environment-style variables resolved through `lookup`
    #[inline]
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(bucket) = var(ENV_BUCKET_NAME) {
            self.storage.bucket = bucket;
        }
        if let Some(key) = var(ENV_DOCUMENTS_KEY) {
            self.storage.documents_key = key;
        }
        if let Some(folder) = var(ENV_INDEX_FOLDER) {
            self.storage.index_folder = folder;
        }
        if let Some(endpoint) = var(ENV_STORAGE_ENDPOINT) {
            self.storage.endpoint = Some(endpoint);
            self.storage.backend = StorageBackend::Http;
        }
        if let Some(backend) = var(ENV_STORAGE_BACKEND) {
            self.storage.backend = backend.parse()?;
        }
        if let Some(root) = var(ENV_STORAGE_ROOT) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(token) = var(ENV_TELEGRAM_BOT_TOKEN) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(endpoint) = var(ENV_MODEL_ENDPOINT) {
            self.models.endpoint = endpoint;
        }
        if let Some(model) = var(ENV_EMBEDDING_MODEL) {
            self.models.embedding_model = model;
        }
        if let Some(model) = var(ENV_GENERATION_MODEL) {
            self.models.generation_model = model;
        }

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.models.validate()?;
        self.retrieval.validate()?;

        self.telegram.api_url()?;

        if !(1..=900).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }

        Ok(())
    }

    /// Copy of this configuration safe to print
    #[inline]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.telegram.bot_token.is_some() {
            config.telegram.bot_token = Some("********".to_string());
        }
        config
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::EmptyBucket);
        }

        if self.documents_key.trim().is_empty() {
            return Err(ConfigError::EmptyKey("documents_key"));
        }

        if self.index_folder.trim().is_empty() {
            return Err(ConfigError::EmptyKey("index_folder"));
        }

        if self.backend == StorageBackend::Http {
            let endpoint = self
                .endpoint
                .as_deref()
                .ok_or(ConfigError::MissingStorageEndpoint)?;
            Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl(endpoint.to_string()))?;
        }

        Ok(())
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.endpoint.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generation_model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.endpoint).map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))
    }
}

impl TelegramConfig {
    #[inline]
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api_url).map_err(|_| ConfigError::InvalidUrl(self.api_url.clone()))
    }

    /// The bot token, if one is configured and not blank
    #[inline]
    pub fn token(&self) -> Result<&str, ConfigError> {
        self.bot_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingBotToken)
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        validate_prompt_template(&self.prompt_template)
    }
}

/// Check that a prompt template carries both substitution slots
#[inline]
pub fn validate_prompt_template(template: &str) -> Result<(), ConfigError> {
    if !template.contains(CONTEXT_SLOT) {
        return Err(ConfigError::InvalidPromptTemplate(CONTEXT_SLOT));
    }
    if !template.contains(QUESTION_SLOT) {
        return Err(ConfigError::InvalidPromptTemplate(QUESTION_SLOT));
    }
    Ok(())
}
