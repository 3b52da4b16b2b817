use crate::error::{Result, SearchError};
use crate::fuzzy::FuzzyScorer;
use crate::lexical::LexicalScores;
use docrag_corpus::Corpus;
use serde::{Deserialize, Serialize};

/// Weights and constants for combining lexical, vector and fuzzy signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub bm25_weight: f32,
    pub vector_weight: f32,
    pub fuzzy_weight: f32,

    /// Raw similarity is divided by this before clamping to `[0, 1]`
    pub vector_scale: f32,

    /// Multiplier applied when both lexical and vector signals are strong
    pub consensus_boost: f32,
    pub consensus_threshold: f32,

    /// Fuzzy matching only looks at this many leading characters
    pub fuzzy_prefix_chars: usize,

    /// Upper bound on vector candidates pulled per query
    pub candidate_pool: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            bm25_weight: 0.3,
            vector_weight: 0.7,
            fuzzy_weight: 0.0,
            vector_scale: 1.5,
            consensus_boost: 1.2,
            consensus_threshold: 0.5,
            fuzzy_prefix_chars: 1000,
            candidate_pool: 100,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("bm25_weight", self.bm25_weight),
            ("vector_weight", self.vector_weight),
            ("fuzzy_weight", self.fuzzy_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::InvalidConfig(format!(
                    "fusion.{name} must be a non-negative number, got {weight}"
                )));
            }
        }
        let sum = self.weight_sum();
        if sum > 1.0 + 1e-6 {
            return Err(SearchError::InvalidConfig(format!(
                "fusion weights must sum to at most 1.0, got {sum:.3}"
            )));
        }
        if self.vector_scale.is_nan() || self.vector_scale <= 0.0 {
            return Err(SearchError::InvalidConfig(
                "fusion.vector_scale must be positive".to_string(),
            ));
        }
        if self.consensus_boost.is_nan() || self.consensus_boost < 1.0 {
            return Err(SearchError::InvalidConfig(
                "fusion.consensus_boost must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(SearchError::InvalidConfig(
                "fusion.consensus_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.candidate_pool == 0 {
            return Err(SearchError::InvalidConfig(
                "fusion.candidate_pool must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn weight_sum(&self) -> f32 {
        self.bm25_weight + self.vector_weight + self.fuzzy_weight
    }

    /// Largest score [`fuse`] can produce under this config
    pub fn max_score(&self) -> f32 {
        self.weight_sum() * self.consensus_boost
    }
}

/// Normalised component signals and the combined score for one chunk
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub bm25: f32,
    pub vector: f32,
    pub fuzzy: f32,
    pub fused: f32,
    pub consensus: bool,
}

/// Map a raw cosine similarity into `[0, 1]`.
pub fn normalize_similarity(similarity: f32, scale: f32) -> f32 {
    if !similarity.is_finite() || scale <= 0.0 {
        return 0.0;
    }
    (similarity / scale).clamp(0.0, 1.0)
}

/// Weighted sum of already-normalised signals with the consensus boost.
pub fn fuse(config: &FusionConfig, bm25: f32, vector: f32, fuzzy: f32) -> ScoreBreakdown {
    let bm25 = bm25.clamp(0.0, 1.0);
    let vector = vector.clamp(0.0, 1.0);
    let fuzzy = fuzzy.clamp(0.0, 1.0);

    let mut fused =
        config.bm25_weight * bm25 + config.vector_weight * vector + config.fuzzy_weight * fuzzy;
    let consensus = bm25 > config.consensus_threshold && vector > config.consensus_threshold;
    if consensus {
        fused *= config.consensus_boost;
    }

    ScoreBreakdown {
        bm25,
        vector,
        fuzzy,
        fused,
        consensus,
    }
}

/// Per-query scorer: lexical scores are computed once, then each candidate
/// chunk is scored against them.
pub struct FusionScorer<'a> {
    config: &'a FusionConfig,
    corpus: &'a Corpus,
    lexical: &'a LexicalScores,
    fuzzy: Option<FuzzyScorer>,
}

impl<'a> FusionScorer<'a> {
    pub fn new(
        config: &'a FusionConfig,
        corpus: &'a Corpus,
        lexical: &'a LexicalScores,
        query: &str,
    ) -> Self {
        let fuzzy = (config.fuzzy_weight > 0.0)
            .then(|| FuzzyScorer::new(query, config.fuzzy_prefix_chars));
        Self {
            config,
            corpus,
            lexical,
            fuzzy,
        }
    }

    pub fn score(&mut self, chunk_idx: usize, similarity: f32) -> ScoreBreakdown {
        let bm25 = self.lexical.normalized(chunk_idx);
        let vector = normalize_similarity(similarity, self.config.vector_scale);
        let fuzzy = match (self.fuzzy.as_mut(), self.corpus.get(chunk_idx)) {
            (Some(scorer), Some(chunk)) => scorer.score(&chunk.text),
            _ => 0.0,
        };
        fuse(self.config, bm25, vector, fuzzy)
    }
}
