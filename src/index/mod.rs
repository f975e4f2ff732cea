// Vector index
// In-memory chunk collection with exact cosine-similarity retrieval


use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Metadata key that is always present on a stored chunk
pub const DEFAULT_METADATA_KEY: &str = "source";
/// Value assigned to [`DEFAULT_METADATA_KEY`] when a chunk arrives without metadata
pub const DEFAULT_METADATA_VALUE: &str = "unknown";

/// Scalar value allowed in chunk metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for MetadataValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Chunk metadata, ordered by key
pub type Metadata = BTreeMap<String, MetadataValue>;

/// The sentinel metadata given to chunks that carry none
#[inline]
pub fn default_metadata() -> Metadata {
    Metadata::from([(
        DEFAULT_METADATA_KEY.to_string(),
        MetadataValue::from(DEFAULT_METADATA_VALUE),
    )])
}

/// Replace an empty metadata map with [`default_metadata`]
#[inline]
pub fn normalize_metadata(metadata: Metadata) -> Metadata {
    if metadata.is_empty() {
        default_metadata()
    } else {
        metadata
    }
}

/// Id assigned to the chunk at `position` when an index is built
#[inline]
pub fn chunk_id(position: usize) -> String {
    format!("chunk_{}", position)
}

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Duplicate chunk id: {0}")]
    DuplicateId(String),
    #[error("Dimension mismatch: index has dimension {expected}, query vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Borrowed view of one stored chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkRef<'a> {
    pub position: usize,
    pub id: &'a str,
    pub vector: &'a [f32],
    pub metadata: &'a Metadata,
    pub text: &'a str,
}

/// One ranked retrieval hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Insertion position of the chunk in the index
    pub position: usize,
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine similarity in `[-1, 1]`
    pub similarity: f32,
}

/// Named in-memory collection of chunks stored as four aligned arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    name: String,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    metadatas: Vec<Metadata>,
    texts: Vec<String>,
    dimension: Option<usize>,
}

impl VectorIndex {
    /// Create an empty index
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build an index from normalized inputs and their embeddings, assigning
    /// `chunk_<position>` ids in input order
    #[inline]
    pub fn build(
        name: impl Into<String>,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if vectors.len() != texts.len() {
            return Err(IndexError::Schema(format!(
                "received {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let ids = (0..texts.len()).map(chunk_id).collect();
        let mut index = Self::new(name);
        index.load(ids, vectors, metadatas, texts)?;
        Ok(index)
    }

    /// Replace the index contents with the given parallel arrays.
    ///
    /// On error the current contents are kept.
    #[inline]
    pub fn load(
        &mut self,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<Metadata>,
        texts: Vec<String>,
    ) -> Result<(), IndexError> {
        let len = ids.len();
        if vectors.len() != len || metadatas.len() != len || texts.len() != len {
            return Err(IndexError::Schema(format!(
                "array lengths differ: {} ids, {} vectors, {} metadatas, {} texts",
                len,
                vectors.len(),
                metadatas.len(),
                texts.len()
            )));
        }

        let dimension = vectors.first().map(Vec::len);
        if dimension == Some(0) {
            return Err(IndexError::Schema("vectors must not be empty".to_string()));
        }

        for (position, vector) in vectors.iter().enumerate() {
            if Some(vector.len()) != dimension {
                return Err(IndexError::Schema(format!(
                    "vector at position {} has dimension {}, expected {}",
                    position,
                    vector.len(),
                    dimension.unwrap_or_default()
                )));
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(IndexError::Schema(format!(
                    "vector at position {} contains a non-finite value",
                    position
                )));
            }
        }

        let mut seen = HashSet::with_capacity(len);
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(IndexError::DuplicateId(id.clone()));
            }
        }

        self.ids = ids;
        self.vectors = vectors;
        self.metadatas = metadatas.into_iter().map(normalize_metadata).collect();
        self.texts = texts;
        self.dimension = dimension;

        info!(
            "Loaded {} chunks into index '{}' (dimension {:?})",
            len, self.name, self.dimension
        );
        Ok(())
    }

    /// Rank stored chunks by cosine similarity to `vector` and return the best `k`.
    ///
    /// Ties keep insertion order.
    #[inline]
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        let Some(dimension) = self.dimension else {
            debug!("Query against empty index '{}'", self.name);
            return Ok(Vec::new());
        };

        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, stored)| (position, cosine_similarity(vector, stored)))
            .collect();

        scored.sort_by(|(pos_a, sim_a), (pos_b, sim_b)| {
            sim_b.total_cmp(sim_a).then_with(|| pos_a.cmp(pos_b))
        });
        scored.truncate(k);

        debug!(
            "Ranked {} of {} chunks in index '{}'",
            scored.len(),
            self.size(),
            self.name
        );

        Ok(scored
            .into_iter()
            .map(|(position, similarity)| SearchResult {
                position,
                id: self.ids[position].clone(),
                text: self.texts[position].clone(),
                metadata: self.metadatas[position].clone(),
                similarity,
            })
            .collect())
    }

    /// Number of stored chunks
    #[inline]
    pub fn size(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vector dimension shared by all chunks, `None` while empty
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[inline]
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    #[inline]
    pub fn metadatas(&self) -> &[Metadata] {
        &self.metadatas
    }

    #[inline]
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    #[inline]
    pub fn get(&self, position: usize) -> Option<ChunkRef<'_>> {
        Some(ChunkRef {
            position,
            id: self.ids.get(position)?,
            vector: self.vectors.get(position)?,
            metadata: self.metadatas.get(position)?,
            text: self.texts.get(position)?,
        })
    }
}

/// Cosine similarity of two equal-length vectors; 0.0 when either has zero magnitude
///
/// Sums run in `f64` so large finite components cannot overflow. Orthogonal
/// vectors always score `+0.0`.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(dot, norm_a, norm_b), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (x.mul_add(y, dot), x.mul_add(x, norm_a), y.mul_add(y, norm_b))
        },
    );
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !similarity.is_finite() {
        return 0.0;
    }
    // total_cmp orders -0.0 below +0.0
    (similarity as f32) + 0.0
}
