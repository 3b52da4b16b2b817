use crate::error::{Result, SearchError};
use docrag_graph::EntityExtractor;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const BUILTIN_TAXONOMY: &str = include_str!("../data/taxonomy.json");

const TURKISH_CHARS: &[char] = &['ç', 'ğ', 'ı', 'ö', 'ş', 'ü'];

const EXACT_SYNONYM_LIMIT: usize = 5;
const PARTIAL_PER_KEY_LIMIT: usize = 3;
const MIN_PARTIAL_KEY_CHARS: usize = 3;
const MIN_TERM_CHARS: usize = 3;
const CROSS_LANGUAGE_PER_WORD: usize = 2;
const CROSS_LANGUAGE_TOTAL: usize = 4;

static BUILTIN: Lazy<std::result::Result<Arc<Taxonomy>, String>> = Lazy::new(|| {
    TaxonomyTable::from_json(BUILTIN_TAXONOMY)
        .map(|table| Arc::new(Taxonomy::from_table(&table)))
        .map_err(|e| e.to_string())
});

/// Query expansion thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub max_terms: usize,

    /// A first round with fewer results than this triggers expansion
    pub min_results: usize,

    /// A first round below this confidence triggers expansion
    pub min_confidence: f32,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_terms: 8,
            min_results: 3,
            min_confidence: 0.4,
        }
    }
}

impl ExpansionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_terms == 0 {
            return Err(SearchError::InvalidConfig(
                "expansion.max_terms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(SearchError::InvalidConfig(
                "expansion.min_confidence must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Tr,
}

impl Language {
    pub fn detect(text: &str) -> Self {
        if text.to_lowercase().contains(TURKISH_CHARS) {
            Self::Tr
        } else {
            Self::En
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Tr => "tr",
        }
    }
}

fn has_turkish_chars(text: &str) -> bool {
    text.to_lowercase().contains(TURKISH_CHARS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub original: String,
    pub expanded: String,
    pub added_terms: Vec<String>,
    pub detected_entities: Vec<String>,
    pub language: Language,
    pub expansion_confidence: f32,
}

impl ExpandedQuery {
    pub fn added_anything(&self) -> bool {
        !self.added_terms.is_empty()
    }
}

/// Taxonomy source data (see `data/taxonomy.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyTable {
    pub groups: Vec<TaxonomyGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyGroup {
    pub name: String,
    pub entries: Vec<TaxonomyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub term: String,
    pub synonyms: Vec<String>,
}

impl TaxonomyTable {
    pub fn from_json(raw: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(raw)?;
        for group in &table.groups {
            if let Some(entry) = group.entries.iter().find(|e| e.term.trim().is_empty()) {
                return Err(SearchError::InvalidRules(format!(
                    "taxonomy group '{}' has an entry with an empty term ({:?})",
                    group.name, entry.synonyms
                )));
            }
        }
        Ok(table)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TAXONOMY)
    }
}

/// Bidirectional synonym map.
///
/// Each main term maps to its synonyms. Each synonym not already present maps
/// back to the main term followed by the remaining synonyms. Groups are
/// applied in order, and a later main term replaces an earlier entry.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    mappings: BTreeMap<String, Vec<String>>,
    group_sizes: BTreeMap<String, usize>,
}

impl Taxonomy {
    pub fn builtin() -> Result<Arc<Self>> {
        BUILTIN
            .as_ref()
            .map(Arc::clone)
            .map_err(|e| SearchError::InvalidRules(e.clone()))
    }

    pub fn from_table(table: &TaxonomyTable) -> Self {
        let mut mappings: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut group_sizes = BTreeMap::new();

        for group in &table.groups {
            group_sizes.insert(group.name.clone(), group.entries.len());
            for entry in &group.entries {
                let main = entry.term.trim().to_lowercase();
                mappings.insert(main.clone(), entry.synonyms.clone());
                for synonym in &entry.synonyms {
                    let key = synonym.to_lowercase();
                    if mappings.contains_key(&key) {
                        continue;
                    }
                    let reverse = std::iter::once(entry.term.clone())
                        .chain(entry.synonyms.iter().filter(|s| *s != synonym).cloned())
                        .collect();
                    mappings.insert(key, reverse);
                }
            }
        }

        Self {
            mappings,
            group_sizes,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn get(&self, term: &str) -> Option<&[String]> {
        self.mappings.get(term).map(Vec::as_slice)
    }

    /// Synonyms for one term: exact entry (first 5), else up to 3 from every
    /// key that contains the term or is contained in it. Partial matching
    /// ignores terms and keys shorter than 3 chars.
    pub fn find_synonyms(&self, term: &str) -> Vec<String> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }
        if let Some(values) = self.mappings.get(&term) {
            return values.iter().take(EXACT_SYNONYM_LIMIT).cloned().collect();
        }
        if term.chars().count() < MIN_PARTIAL_KEY_CHARS {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut synonyms = Vec::new();
        for (key, values) in &self.mappings {
            if key.chars().count() < MIN_PARTIAL_KEY_CHARS {
                continue;
            }
            if !(key.contains(term.as_str()) || term.contains(key.as_str())) {
                continue;
            }
            for value in values.iter().take(PARTIAL_PER_KEY_LIMIT) {
                if seen.insert(value.to_lowercase()) {
                    synonyms.push(value.clone());
                }
            }
        }
        synonyms.truncate(EXACT_SYNONYM_LIMIT);
        synonyms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpanderStats {
    pub taxonomy_terms: usize,
    pub groups: BTreeMap<String, usize>,
}

/// Taxonomy-driven query expansion with Turkish/English bridging
#[derive(Clone)]
pub struct QueryExpander {
    taxonomy: Arc<Taxonomy>,
    extractor: Arc<EntityExtractor>,
    config: ExpansionConfig,
}

impl std::fmt::Debug for QueryExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExpander")
            .field("taxonomy_terms", &self.taxonomy.len())
            .field("config", &self.config)
            .finish()
    }
}

impl QueryExpander {
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(
            Taxonomy::builtin()?,
            EntityExtractor::builtin()?,
            ExpansionConfig::default(),
        ))
    }

    pub const fn new(
        taxonomy: Arc<Taxonomy>,
        extractor: Arc<EntityExtractor>,
        config: ExpansionConfig,
    ) -> Self {
        Self {
            taxonomy,
            extractor,
            config,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ExpansionConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Expand with the configured `max_terms`
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        self.expand_with_limit(query, self.config.max_terms)
    }

    pub fn expand_with_limit(&self, query: &str, max_terms: usize) -> ExpandedQuery {
        let language = Language::detect(query);
        let detected_entities = self.detected_entities(query);
        let query_lower = query.to_lowercase();

        let mut seen_terms = HashSet::new();
        let terms: Vec<String> = query_words(query)
            .chain(detected_entities.iter().map(|e| e.to_lowercase()))
            .filter(|term| seen_terms.insert(term.clone()))
            .collect();

        let mut added_terms: Vec<String> = Vec::new();
        let mut added_lower = HashSet::new();
        'terms: for term in &terms {
            for candidate in self.taxonomy.find_synonyms(term) {
                if added_terms.len() >= max_terms {
                    break 'terms;
                }
                let lower = candidate.to_lowercase();
                if query_lower.contains(lower.as_str())
                    || candidate.trim().chars().count() < MIN_TERM_CHARS
                    || !added_lower.insert(lower)
                {
                    continue;
                }
                added_terms.push(candidate);
            }
        }

        let (expanded, expansion_confidence) = if added_terms.is_empty() || max_terms == 0 {
            (query.to_string(), 0.0)
        } else {
            (
                format!("{} {}", query, added_terms.join(" ")),
                (added_terms.len() as f32 / max_terms as f32).min(1.0),
            )
        };

        log::debug!(
            "Expanded '{}' with {} terms: {:?}",
            query,
            added_terms.len(),
            added_terms
        );

        ExpandedQuery {
            original: query.to_string(),
            expanded,
            added_terms,
            detected_entities,
            language,
            expansion_confidence,
        }
    }

    /// `[query]`, plus the query extended with up to four opposite-language
    /// synonyms when any exist.
    pub fn cross_language_variants(&self, query: &str) -> Vec<String> {
        let want_turkish = Language::detect(query) == Language::En;
        let mut translated = Vec::new();
        for word in query_words(query) {
            translated.extend(
                self.taxonomy
                    .find_synonyms(&word)
                    .into_iter()
                    .filter(|s| has_turkish_chars(s) == want_turkish)
                    .take(CROSS_LANGUAGE_PER_WORD),
            );
        }
        translated.truncate(CROSS_LANGUAGE_TOTAL);

        let mut variants = vec![query.to_string()];
        if !translated.is_empty() {
            variants.push(format!("{} {}", query, translated.join(" ")));
        }
        variants
    }

    /// Whether a first round is weak enough to warrant a second, expanded one
    pub fn should_expand(&self, result_count: usize, confidence: f32) -> bool {
        result_count == 0
            || result_count < self.config.min_results
            || confidence < self.config.min_confidence
    }

    pub fn stats(&self) -> ExpanderStats {
        ExpanderStats {
            taxonomy_terms: self.taxonomy.len(),
            groups: self.taxonomy.group_sizes.clone(),
        }
    }

    fn detected_entities(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.extractor
            .extract_entities(query)
            .into_iter()
            .map(|entity| entity.text.trim().to_string())
            .filter(|text| !text.is_empty() && seen.insert(text.to_lowercase()))
            .collect()
    }
}

/// Whitespace-split, punctuation-trimmed, lowercased words
fn query_words(query: &str) -> impl Iterator<Item = String> + '_ {
    query
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expander() -> QueryExpander {
        QueryExpander::builtin().unwrap()
    }

    #[test]
    fn taxonomy_is_bidirectional() {
        let taxonomy = Taxonomy::builtin().unwrap();
        assert_eq!(
            taxonomy.get("hedefleme").unwrap(),
            &["targeting", "target", "segment selection", "kitle seçimi"]
        );
        // main terms win over reverse entries
        assert_eq!(taxonomy.get("audience").unwrap()[0], "segment");
        assert_eq!(taxonomy.get("limit").unwrap()[0], "sınır");
    }

    #[test]
    fn exact_synonyms_are_capped_at_five() {
        let taxonomy = Taxonomy::builtin().unwrap();
        assert_eq!(
            taxonomy.find_synonyms("hata"),
            vec!["error", "exception", "failure", "issue", "problem"]
        );
        assert_eq!(taxonomy.find_synonyms("Push").len(), 4);
    }

    #[test]
    fn partial_match_uses_contained_keys() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let synonyms = taxonomy.find_synonyms("boyutu");
        assert_eq!(synonyms, vec!["size", "dimension", "payload size"]);
        assert!(taxonomy.find_synonyms("zzzz").is_empty());
        assert!(taxonomy.find_synonyms("  ").is_empty());
    }

    #[test]
    fn turkish_size_limit_query_bridges_to_english() {
        let expanded = expander().expand("push boyutu limit");
        assert!(expanded.added_terms.contains(&"size".to_string()));
        assert!(expanded.expanded.contains("size"));
        assert!(expanded.expanded.contains("limit"));
        assert!(expanded.added_terms.len() <= 8);
        assert!(expanded.expanded.starts_with("push boyutu limit "));
    }

    #[test]
    fn language_detection_uses_turkish_letters() {
        assert_eq!(Language::detect("bildirim sınırı nedir"), Language::Tr);
        assert_eq!(Language::detect("ÇÖKME"), Language::Tr);
        assert_eq!(Language::detect("push boyutu limit"), Language::En);
    }

    #[test]
    fn expansion_skips_terms_already_in_query() {
        let expanded = expander().expand("push notification bildirim");
        assert!(!expanded.added_terms.iter().any(|t| t == "push notification"));
        assert!(!expanded.added_terms.iter().any(|t| t == "bildirim"));
    }

    #[test]
    fn expansion_respects_max_terms_and_confidence() {
        let expanded = expander().expand_with_limit("push boyutu limit", 2);
        assert_eq!(expanded.added_terms.len(), 2);
        assert_eq!(expanded.expansion_confidence, 1.0);

        let expanded = expander().expand("push");
        assert_eq!(expanded.added_terms.len(), 4);
        assert!((expanded.expansion_confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nothing_to_add_keeps_query() {
        let expanded = expander().expand("zzzz qqqq");
        assert!(!expanded.added_anything());
        assert_eq!(expanded.expanded, "zzzz qqqq");
        assert_eq!(expanded.expansion_confidence, 0.0);
        assert_eq!(expanded.language, Language::En);
    }

    #[test]
    fn detected_entities_come_from_extractor() {
        let expanded = expander().expand("Netmera SDK requires API key configuration");
        assert_eq!(
            expanded.detected_entities,
            vec!["Netmera SDK", "API key", "configuration"]
        );
    }

    #[test]
    fn should_expand_thresholds() {
        let expander = expander();
        assert!(!expander.should_expand(5, 0.9));
        assert!(expander.should_expand(0, 0.9));
        assert!(expander.should_expand(2, 0.9));
        assert!(expander.should_expand(5, 0.39));

        let relaxed = expander.with_config(ExpansionConfig {
            min_results: 1,
            min_confidence: 0.1,
            ..ExpansionConfig::default()
        });
        assert!(!relaxed.should_expand(2, 0.2));
        assert!(relaxed.should_expand(0, 0.9));
    }

    #[test]
    fn cross_language_variants_pick_opposite_language() {
        let variants = expander().cross_language_variants("push permission");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], "push permission");
        assert!(variants[1].starts_with("push permission "));
        assert!(variants[1].contains("anlık bildirim"));

        let variants = expander().cross_language_variants("zzzz");
        assert_eq!(variants, vec!["zzzz"]);
    }

    #[test]
    fn stats_report_groups() {
        let stats = expander().stats();
        assert_eq!(stats.groups.get("errors"), Some(&9));
        assert!(stats.taxonomy_terms > 100);
    }
}
