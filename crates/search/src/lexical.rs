use docrag_corpus::Corpus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Lowercased Unicode word tokens, in text order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Query tokens: like [`tokenize`] but deduplicated, first occurrence kept.
pub fn query_tokens(query: &str) -> Vec<String> {
    let mut tokens = tokenize(query);
    let mut seen = std::collections::HashSet::new();
    tokens.retain(|token| seen.insert(token.clone()));
    tokens
}

/// In-memory BM25 index over every chunk of a corpus.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    config: Bm25Config,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<f32>,
    doc_freq: HashMap<String, u32>,
    avg_doc_len: f32,
}

impl Bm25Index {
    pub fn build(corpus: &Corpus, config: Bm25Config) -> Self {
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lengths = Vec::with_capacity(corpus.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for chunk in corpus.chunks() {
            let tokens = tokenize(&chunk.text);
            doc_lengths.push(tokens.len() as f32);

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let avg_doc_len = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<f32>() / doc_lengths.len() as f32
        };

        log::debug!(
            "Built BM25 index: {} docs, {} terms, avg length {:.1}",
            doc_lengths.len(),
            doc_freq.len(),
            avg_doc_len
        );

        Self {
            config,
            term_freqs,
            doc_lengths,
            doc_freq,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Raw BM25 score of every document for the given (deduplicated) tokens.
    pub fn scores(&self, tokens: &[String]) -> LexicalScores {
        let total_docs = self.len() as f32;
        let mut raw = vec![0.0f32; self.len()];
        if self.is_empty() || tokens.is_empty() {
            return LexicalScores::new(raw);
        }

        let Bm25Config { k1, b } = self.config;
        let avg_len = self.avg_doc_len.max(1.0);

        for token in tokens {
            let Some(&df) = self.doc_freq.get(token) else {
                continue;
            };
            let idf = bm25_idf(total_docs, df as f32);
            for (doc, tf_map) in self.term_freqs.iter().enumerate() {
                let Some(&tf) = tf_map.get(token) else {
                    continue;
                };
                let tf = tf as f32;
                let norm = 1.0 - b + b * (self.doc_lengths[doc] / avg_len);
                raw[doc] += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }

        LexicalScores::new(raw)
    }

    pub fn score_query(&self, query: &str) -> LexicalScores {
        self.scores(&query_tokens(query))
    }
}

fn bm25_idf(total_docs: f32, df: f32) -> f32 {
    ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Per-document BM25 scores for one query, with percentile normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalScores {
    raw: Vec<f32>,
    p95: f32,
}

impl LexicalScores {
    fn new(raw: Vec<f32>) -> Self {
        let p95 = percentile(&raw, 0.95);
        Self { raw, p95 }
    }

    pub fn raw(&self, idx: usize) -> f32 {
        self.raw.get(idx).copied().unwrap_or(0.0)
    }

    pub const fn p95(&self) -> f32 {
        self.p95
    }

    /// `min(raw / p95, 1)`; divides by 1 when the 95th percentile is zero.
    pub fn normalized(&self, idx: usize) -> f32 {
        let denom = if self.p95 > 0.0 { self.p95 } else { 1.0 };
        (self.raw(idx) / denom).clamp(0.0, 1.0)
    }

    /// Documents with a positive raw score, best first (ties by index).
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut hits: Vec<(usize, f32)> = self
            .raw
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        hits
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Linear-interpolated percentile, `q` in `[0, 1]`.
fn percentile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_corpus::ChunkMetadata;
    use pretty_assertions::assert_eq;

    fn corpus() -> Corpus {
        Corpus::from_pairs(
            [
                "Netmera SDK requires API key configuration",
                "Push notification payload size limit is 4KB",
                "Configure Gradle for the Android SDK",
                "User segmentation groups users by behaviour",
            ]
            .map(|text| (text, ChunkMetadata::default())),
        )
        .unwrap()
    }

    #[test]
    fn tokenize_lowercases_and_splits_words() {
        assert_eq!(
            tokenize("Netmera SDK, requires API-key!"),
            vec!["netmera", "sdk", "requires", "api", "key"]
        );
        assert_eq!(query_tokens("sdk SDK api"), vec!["sdk", "api"]);
    }

    #[test]
    fn idf_is_always_positive() {
        assert!(bm25_idf(1.0, 1.0) > 0.0);
        assert!(bm25_idf(10.0, 10.0) > 0.0);
        assert!(bm25_idf(10.0, 1.0) > bm25_idf(10.0, 5.0));
    }

    #[test]
    fn matching_doc_ranks_first() {
        let index = Bm25Index::build(&corpus(), Bm25Config::default());
        let scores = index.score_query("push payload limit");
        let top = scores.top_k(5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, 1);
        assert!((scores.normalized(1) - 1.0).abs() < 1e-6);
        assert_eq!(scores.normalized(0), 0.0);
    }

    #[test]
    fn top_k_skips_zero_scores_and_orders_by_score() {
        let index = Bm25Index::build(&corpus(), Bm25Config::default());
        let scores = index.score_query("sdk android gradle");
        let top = scores.top_k(10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, 2);
        assert_eq!(top[1].0, 0);
        assert!(top[0].1 > top[1].1);
    }

    #[test]
    fn unknown_terms_score_zero() {
        let index = Bm25Index::build(&corpus(), Bm25Config::default());
        let scores = index.score_query("kubernetes");
        assert!(scores.top_k(10).is_empty());
        assert_eq!(scores.p95(), 0.0);
        assert_eq!(scores.normalized(0), 0.0);
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[2.0], 0.95), 2.0);
        let p = percentile(&[0.0, 10.0], 0.95);
        assert!((p - 9.5).abs() < 1e-5);
    }

    #[test]
    fn normalized_is_capped_at_one() {
        let scores = LexicalScores::new(vec![0.0, 1.0, 2.0, 100.0]);
        for idx in 0..4 {
            let n = scores.normalized(idx);
            assert!((0.0..=1.0).contains(&n));
        }
        assert_eq!(scores.normalized(3), 1.0);
    }
}
