// Retrieval-augmented query service
// Embeds a question, retrieves the closest chunks and asks the generation model


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::{CONTEXT_SLOT, Config, ConfigError, QUESTION_SLOT, validate_prompt_template};
use crate::index::{IndexError, SearchResult, VectorIndex};
use crate::models::{
    EmbeddingError, EmbeddingProvider, GenerationError, GenerationProvider, embed_within,
    generate_within,
};
use crate::snapshot::{SnapshotError, download_snapshot};
use crate::storage::{ObjectStore, StorageError};
use crate::telegram::Answerer;

/// Separator placed between retrieved chunk texts in the prompt context
pub const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Retrieval(#[from] IndexError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("Index snapshot not found: {0}")]
    SnapshotMissing(String),
    #[error("Index snapshot is unusable: {0}")]
    CorruptSnapshot(SnapshotError),
    #[error("Failed to fetch index snapshot: {0}")]
    Storage(StorageError),
    #[error("Timed out loading index snapshot after {0:?}")]
    Timeout(Duration),
    #[error("Invalid prompt template: {0}")]
    Template(#[from] ConfigError),
}

impl From<SnapshotError> for InitError {
    #[inline]
    fn from(error: SnapshotError) -> Self {
        match error {
            SnapshotError::Storage(StorageError::NotFound(key)) => Self::SnapshotMissing(key),
            SnapshotError::Storage(other) => Self::Storage(other),
            other => Self::CorruptSnapshot(other),
        }
    }
}

/// Stages a single query moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Embedding,
    Retrieving,
    Prompting,
    Generating,
    Done,
    Failed,
}

impl QueryState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for QueryState {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Embedding => "embedding",
            Self::Retrieving => "retrieving",
            Self::Prompting => "prompting",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one query and logs every transition
#[derive(Debug)]
struct QueryRun {
    state: QueryState,
    history: Vec<QueryState>,
}

impl QueryRun {
    fn new() -> Self {
        Self {
            state: QueryState::Idle,
            history: vec![QueryState::Idle],
        }
    }

    fn advance(&mut self, next: QueryState) {
        debug!("Query state {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn fail<E: Into<QueryError>>(&mut self, error: E) -> QueryError {
        let error = error.into();
        error!("Query failed while {}: {}", self.state, error);
        self.advance(QueryState::Failed);
        error
    }
}

/// Prompt text with `{context}` and `{question}` slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    #[inline]
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigError> {
        let template = template.into();
        validate_prompt_template(&template)?;
        Ok(Self { template })
    }

    /// Substitute both slots in one pass, so slot markers inside the
    /// context or question text are left alone
    #[inline]
    pub fn render(&self, context: &str, question: &str) -> String {
        self.template
            .split(CONTEXT_SLOT)
            .map(|part| part.replace(QUESTION_SLOT, question))
            .collect::<Vec<_>>()
            .join(context)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// Everything produced while answering one question
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub question: String,
    pub chunks: Vec<SearchResult>,
    pub prompt: String,
    pub answer: String,
}

/// Answers questions against a loaded index
#[derive(Clone)]
pub struct QueryService {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    top_k: usize,
    timeout: Duration,
    template: PromptTemplate,
}

impl fmt::Debug for QueryService {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryService")
            .field("index", &self.index.name())
            .field("chunks", &self.index.size())
            .field("top_k", &self.top_k)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    /// Download the index snapshot and wire the providers.
    ///
    /// Fails without building a partial service if the template is invalid
    /// or the snapshot is missing or corrupt.
    #[inline]
    pub async fn initialize(
        config: &Config,
        store: &dyn ObjectStore,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self, InitError> {
        let template = PromptTemplate::new(config.retrieval.prompt_template.as_str())?;
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let index = tokio::time::timeout(
            timeout,
            download_snapshot(
                store,
                &config.storage.index_folder,
                &config.retrieval.collection_name,
            ),
        )
        .await
        .map_err(|_| InitError::Timeout(timeout))??;

        info!(
            "Loaded index {} with {} chunks",
            index.name(),
            index.size()
        );

        Ok(Self {
            index: Arc::new(index),
            embedder,
            generator,
            top_k: config.retrieval.top_k,
            timeout,
            template,
        })
    }

    /// Build a service around an index that is already in memory
    #[inline]
    pub fn from_index(
        index: impl Into<Arc<VectorIndex>>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        template: PromptTemplate,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            index: index.into(),
            embedder,
            generator,
            top_k,
            timeout,
            template,
        }
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed the question and return the closest chunks, best first
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>, QueryError> {
        let vector = embed_within(self.timeout, self.embedder.embed_query(question)).await?;
        Ok(self.index.query(&vector, self.top_k)?)
    }

    /// Join chunk texts in ranked order and fill the template
    #[inline]
    pub fn compose_prompt(&self, question: &str, chunks: &[SearchResult]) -> String {
        let context = chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        self.template.render(&context, question)
    }

    #[inline]
    pub async fn ask(&self, question: &str) -> Result<QueryOutcome, QueryError> {
        self.run(question).await.map(|(outcome, _)| outcome)
    }

    async fn run(&self, question: &str) -> Result<(QueryOutcome, Vec<QueryState>), QueryError> {
        let mut run = QueryRun::new();

        run.advance(QueryState::Embedding);
        let vector = embed_within(self.timeout, self.embedder.embed_query(question))
            .await
            .map_err(|e| run.fail(e))?;

        run.advance(QueryState::Retrieving);
        let chunks = self
            .index
            .query(&vector, self.top_k)
            .map_err(|e| run.fail(e))?;
        debug!("Retrieved {} chunks", chunks.len());

        run.advance(QueryState::Prompting);
        let prompt = self.compose_prompt(question, &chunks);

        run.advance(QueryState::Generating);
        let answer = generate_within(self.timeout, self.generator.generate(&prompt))
            .await
            .map_err(|e| run.fail(e))?;

        run.advance(QueryState::Done);
        info!(
            "Answered question using {} chunks ({} characters)",
            chunks.len(),
            answer.len()
        );

        let outcome = QueryOutcome {
            question: question.to_string(),
            chunks,
            prompt,
            answer,
        };
        Ok((outcome, run.history))
    }
}

#[async_trait]
impl Answerer for QueryService {
    #[inline]
    async fn answer(&self, question: &str) -> Result<String, QueryError> {
        self.ask(question).await.map(|outcome| outcome.answer)
    }
}
