use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Matcher, Utf32String};

/// Partial-ratio style fuzzy similarity between a query and chunk text.
///
/// Nucleo scores are unbounded integers, so every haystack score is divided by
/// the score the query gets against itself. Built once per query.
pub struct FuzzyScorer {
    matcher: Matcher,
    pattern: Pattern,
    self_score: Option<u32>,
    prefix_chars: usize,
}

impl FuzzyScorer {
    pub fn new(query: &str, prefix_chars: usize) -> Self {
        let mut matcher = Matcher::new(nucleo_matcher::Config::DEFAULT);
        let pattern = Pattern::parse(query, CaseMatching::Smart, Normalization::Smart);
        let haystack = Utf32String::from(query);
        let self_score = pattern
            .score(haystack.slice(..), &mut matcher)
            .filter(|score| *score > 0);
        Self {
            matcher,
            pattern,
            self_score,
            prefix_chars,
        }
    }

    /// Similarity in `[0, 1]` against the first `prefix_chars` characters of `text`.
    pub fn score(&mut self, text: &str) -> f32 {
        let Some(self_score) = self.self_score else {
            return 0.0;
        };
        let prefix = char_prefix(text, self.prefix_chars);
        let haystack = Utf32String::from(prefix);
        self.pattern
            .score(haystack.slice(..), &mut self.matcher)
            .map_or(0.0, |score| {
                (score as f32 / self_score as f32).clamp(0.0, 1.0)
            })
    }
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
