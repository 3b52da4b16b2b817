use crate::error::Result;
use crate::fusion::{FusionConfig, FusionScorer, ScoreBreakdown};
use crate::lexical::{query_tokens, Bm25Config, Bm25Index};
use docrag_corpus::{Chunk, Corpus};
use docrag_vector_store::{QueryEmbedder, VectorIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One ranked passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Arc<Chunk>,
    pub fused_score: f32,
    pub source_label: String,
    pub url: String,
    pub scores: ScoreBreakdown,
}

impl RetrievalResult {
    fn new(chunk: Arc<Chunk>, scores: ScoreBreakdown) -> Self {
        Self {
            source_label: chunk.source_label().to_string(),
            url: chunk.url().to_string(),
            fused_score: scores.fused,
            chunk,
            scores,
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}

/// Output of one fused search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedSearch {
    pub results: Vec<RetrievalResult>,

    /// Set when ranking came from BM25 alone (no vector index, or no vector
    /// hit could be correlated to the corpus)
    pub lexical_fallback: bool,
}

/// Vector-first retrieval re-scored with BM25 (and optionally fuzzy) signals.
///
/// All state is immutable and shared, so one retriever serves concurrent
/// queries.
#[derive(Clone)]
pub struct FusedRetriever {
    corpus: Arc<Corpus>,
    lexical: Arc<Bm25Index>,
    vectors: Option<Arc<VectorIndex>>,
    embedder: Arc<dyn QueryEmbedder>,
    config: FusionConfig,
}

impl std::fmt::Debug for FusedRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusedRetriever")
            .field("chunks", &self.corpus.len())
            .field("vectors", &self.vectors.as_ref().map(|v| v.len()))
            .field("config", &self.config)
            .finish()
    }
}

impl FusedRetriever {
    pub fn new(
        corpus: Arc<Corpus>,
        vectors: Option<Arc<VectorIndex>>,
        embedder: Arc<dyn QueryEmbedder>,
        config: FusionConfig,
        lexical: Bm25Config,
    ) -> Self {
        let lexical = Arc::new(Bm25Index::build(&corpus, lexical));
        Self {
            corpus,
            lexical,
            vectors,
            embedder,
            config,
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub const fn has_vector_index(&self) -> bool {
        self.vectors.is_some()
    }

    /// Top `k` chunks by fused score.
    ///
    /// Embedder or index errors propagate; the caller decides how to degrade.
    pub async fn search(&self, query: &str, k: usize) -> Result<FusedSearch> {
        if k == 0 || self.corpus.is_empty() {
            return Ok(FusedSearch::default());
        }

        let lexical = self.lexical.scores(&query_tokens(query));
        let pool = self.config.candidate_pool.min(self.corpus.len());

        let mut candidates: Vec<(usize, f32)> = Vec::new();
        if let Some(vectors) = &self.vectors {
            let embedding = self.embedder.embed(query).await?;
            let hits = vectors.search(&embedding, pool)?;
            let total_hits = hits.len();
            for hit in hits {
                match self.corpus.correlate(&hit.key) {
                    Some(idx) => candidates.push((idx, hit.similarity)),
                    None => log::debug!("Vector hit '{}' has no corpus chunk", hit.key),
                }
            }
            log::debug!(
                "Correlated {}/{} vector hits for '{}'",
                candidates.len(),
                total_hits,
                query
            );
        }

        let lexical_fallback = candidates.is_empty();
        if lexical_fallback {
            log::debug!("Lexical-only ranking for '{query}'");
            candidates = lexical
                .top_k(pool)
                .into_iter()
                .map(|(idx, _)| (idx, 0.0))
                .collect();
        }

        let mut scorer = FusionScorer::new(&self.config, &self.corpus, &lexical, query);
        let mut seen = std::collections::HashSet::new();
        let mut results: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter(|(idx, _)| seen.insert(*idx))
            .filter_map(|(idx, similarity)| {
                let chunk = self.corpus.get(idx)?.clone();
                Some(RetrievalResult::new(chunk, scorer.score(idx, similarity)))
            })
            .collect();

        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(k);

        Ok(FusedSearch {
            results,
            lexical_fallback,
        })
    }
}
