use crate::error::{CorpusError, Result};
use crate::types::{Chunk, ChunkMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const CORPUS_SCHEMA_VERSION: u32 = 1;

/// Ordered, immutable set of chunks. A chunk's index is its position.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    chunks: Vec<Arc<Chunk>>,
    id_to_idx: HashMap<String, usize>,
    text_to_idx: HashMap<String, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCorpus {
    schema_version: u32,
    chunks: Vec<Chunk>,
}

impl Corpus {
    /// Build a corpus, rejecting empty texts and duplicate ids.
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        let mut id_to_idx = HashMap::with_capacity(chunks.len());
        let mut text_to_idx = HashMap::with_capacity(chunks.len());

        for (idx, chunk) in chunks.iter().enumerate() {
            if chunk.text.trim().is_empty() {
                return Err(CorpusError::EmptyText(chunk.id.clone()));
            }
            if id_to_idx.insert(chunk.id.clone(), idx).is_some() {
                return Err(CorpusError::DuplicateId(chunk.id.clone()));
            }
            // First occurrence wins for text correlation
            text_to_idx.entry(chunk.text.clone()).or_insert(idx);
        }

        Ok(Self {
            chunks: chunks.into_iter().map(Arc::new).collect(),
            id_to_idx,
            text_to_idx,
        })
    }

    /// Build from `(text, metadata)` pairs, assigning ids `chunk_{i}`.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ChunkMetadata)>,
        S: Into<String>,
    {
        let chunks = pairs
            .into_iter()
            .enumerate()
            .map(|(i, (text, metadata))| Chunk::new(format!("chunk_{i}"), text, metadata))
            .collect();
        Self::new(chunks)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let persisted: PersistedCorpus = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != CORPUS_SCHEMA_VERSION {
            return Err(CorpusError::UnsupportedSchema {
                found: persisted.schema_version,
                expected: CORPUS_SCHEMA_VERSION,
            });
        }
        let corpus = Self::new(persisted.chunks)?;
        log::info!("Loaded corpus with {} chunks from {}", corpus.len(), path.display());
        Ok(corpus)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedCorpus {
            schema_version: CORPUS_SCHEMA_VERSION,
            chunks: self.chunks.iter().map(|c| c.as_ref().clone()).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Arc<Chunk>> {
        self.chunks.get(idx)
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.index_of_id(id).and_then(|idx| self.chunks.get(idx))
    }

    #[must_use]
    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.id_to_idx.get(id).copied()
    }

    #[must_use]
    pub fn index_of_text(&self, text: &str) -> Option<usize> {
        self.text_to_idx.get(text).copied()
    }

    /// Map an external key (vector row key) to a chunk index: id first, then exact text.
    #[must_use]
    pub fn correlate(&self, key: &str) -> Option<usize> {
        self.index_of_id(key).or_else(|| self.index_of_text(key))
    }

    #[must_use]
    pub fn chunks(&self) -> &[Arc<Chunk>] {
        &self.chunks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
