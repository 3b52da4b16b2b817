use crate::error::{GraphError, Result};
use crate::types::{entity_id, EntityType, RelationType};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BUILTIN_PATTERNS: &str = include_str!("../data/entity_patterns.json");

const MIN_ENTITY_CHARS: usize = 2;
const CONTEXT_CHARS: usize = 50;

static BUILTIN_EXTRACTOR: Lazy<std::result::Result<Arc<EntityExtractor>, String>> =
    Lazy::new(|| {
        PatternTable::from_json(BUILTIN_PATTERNS)
            .and_then(|table| EntityExtractor::from_table(&table))
            .map(Arc::new)
            .map_err(|e| e.to_string())
    });

/// Declarative extractor configuration (see `data/entity_patterns.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternTable {
    #[serde(default = "default_regex_confidence")]
    pub regex_confidence: f32,
    #[serde(default = "default_term_confidence")]
    pub term_confidence: f32,
    #[serde(default = "default_relation_window")]
    pub relation_window: usize,
    #[serde(default)]
    pub entity_patterns: Vec<TypedPatterns>,
    #[serde(default)]
    pub known_terms: Vec<TypedTerms>,
    #[serde(default)]
    pub relation_triggers: Vec<RelationTriggers>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedPatterns {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedTerms {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationTriggers {
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub patterns: Vec<String>,
}

const fn default_regex_confidence() -> f32 {
    0.7
}

const fn default_term_confidence() -> f32 {
    0.9
}

const fn default_relation_window() -> usize {
    100
}

impl PatternTable {
    pub fn from_json(raw: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_PATTERNS)
    }

    fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("regex_confidence", self.regex_confidence),
            ("term_confidence", self.term_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GraphError::InvalidPatternTable(format!(
                    "{label} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.relation_window == 0 {
            return Err(GraphError::InvalidPatternTable(
                "relation_window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Entity span recognised in a text. Offsets are byte offsets into that text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub text: String,
    pub entity_type: EntityType,
    pub confidence: f32,
    pub start: usize,
    pub end: usize,
    /// Up to 50 characters either side of the span
    pub context: String,
}

impl ExtractedEntity {
    #[must_use]
    pub fn entity_id(&self) -> String {
        entity_id(&self.text, self.entity_type)
    }

    const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// `(subject, object, relation)` mined from text between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub source_id: String,
    pub target: String,
    pub target_id: String,
    pub relation_type: RelationType,
}

struct TypedRegex {
    entity_type: EntityType,
    regex: Regex,
    confidence: f32,
}

/// Regex + dictionary entity recogniser.
///
/// Best effort: output is deterministic for a given input, not guaranteed
/// to be semantically correct.
pub struct EntityExtractor {
    entity_regexes: Vec<TypedRegex>,
    relation_regexes: Vec<(RelationType, Regex)>,
    relation_window: usize,
}

impl std::fmt::Debug for EntityExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityExtractor")
            .field("entity_patterns", &self.entity_regexes.len())
            .field("relation_types", &self.relation_regexes.len())
            .field("relation_window", &self.relation_window)
            .finish()
    }
}

impl EntityExtractor {
    /// Shared extractor compiled from the embedded pattern table
    pub fn builtin() -> Result<Arc<Self>> {
        BUILTIN_EXTRACTOR
            .as_ref()
            .map(Arc::clone)
            .map_err(|e| GraphError::InvalidPatternTable(e.clone()))
    }

    pub fn from_table(table: &PatternTable) -> Result<Self> {
        let mut entity_regexes = Vec::new();

        // Dictionary terms first so equal-confidence ties keep table order
        for group in &table.known_terms {
            for term in &group.terms {
                let pattern = format!(r"\b{}\b", regex::escape(term.trim()));
                entity_regexes.push(TypedRegex {
                    entity_type: group.entity_type,
                    regex: case_insensitive(&pattern)?,
                    confidence: table.term_confidence,
                });
            }
        }
        for group in &table.entity_patterns {
            for pattern in &group.patterns {
                entity_regexes.push(TypedRegex {
                    entity_type: group.entity_type,
                    regex: case_insensitive(pattern)?,
                    confidence: table.regex_confidence,
                });
            }
        }

        let relation_regexes = table
            .relation_triggers
            .iter()
            .filter(|group| !group.patterns.is_empty())
            .map(|group| {
                let joined = group
                    .patterns
                    .iter()
                    .map(|p| format!("(?:{p})"))
                    .collect::<Vec<_>>()
                    .join("|");
                Ok((group.relation_type.clone(), case_insensitive(&joined)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            entity_regexes,
            relation_regexes,
            relation_window: table.relation_window,
        })
    }

    /// Entities in text order, overlaps resolved by confidence
    #[must_use]
    pub fn extract_entities(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut candidates = Vec::new();
        for typed in &self.entity_regexes {
            for m in typed.regex.find_iter(text) {
                let span = m.as_str();
                if span.chars().count() < MIN_ENTITY_CHARS
                    || !span.chars().any(char::is_alphanumeric)
                {
                    continue;
                }
                candidates.push(ExtractedEntity {
                    text: span.to_string(),
                    entity_type: typed.entity_type,
                    confidence: typed.confidence,
                    start: m.start(),
                    end: m.end(),
                    context: context_window(text, m.start(), m.end()),
                });
            }
        }

        let mut accepted = resolve_overlaps(candidates);
        accepted.sort_by_key(|e| e.start);
        log::debug!("Extracted {} entities", accepted.len());
        accepted
    }

    /// Relations between entity pairs closer than the relation window.
    ///
    /// Each relation type whose trigger appears between a pair is emitted
    /// once, oriented from the earlier entity to the later one.
    #[must_use]
    pub fn extract_relationships(
        &self,
        text: &str,
        entities: &[ExtractedEntity],
    ) -> Vec<ExtractedRelation> {
        let mut ordered: Vec<&ExtractedEntity> = entities.iter().collect();
        ordered.sort_by_key(|e| e.start);

        let mut relations = Vec::new();
        for (i, first) in ordered.iter().enumerate() {
            for second in &ordered[i + 1..] {
                let gap_start = first.end.min(second.end);
                let gap_end = first.start.max(second.start);
                let Some(between) = text.get(gap_start..gap_end.max(gap_start)) else {
                    continue;
                };
                if between.chars().count() >= self.relation_window {
                    continue;
                }
                for (relation_type, trigger) in &self.relation_regexes {
                    if trigger.is_match(between) {
                        relations.push(ExtractedRelation {
                            source: first.text.clone(),
                            source_id: first.entity_id(),
                            target: second.text.clone(),
                            target_id: second.entity_id(),
                            relation_type: relation_type.clone(),
                        });
                    }
                }
            }
        }
        log::debug!("Extracted {} relationships", relations.len());
        relations
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// Greedy selection: confidence desc, then earlier start, then longer span
fn resolve_overlaps(mut candidates: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| (b.end - b.start).cmp(&(a.end - a.start)))
    });

    let mut accepted: Vec<ExtractedEntity> = Vec::new();
    for candidate in candidates {
        if !accepted.iter().any(|existing| existing.overlaps(&candidate)) {
            accepted.push(candidate);
        }
    }
    accepted
}

fn context_window(text: &str, start: usize, end: usize) -> String {
    let before: String = {
        let prefix = &text[..start];
        let skip = prefix.chars().count().saturating_sub(CONTEXT_CHARS);
        prefix.chars().skip(skip).collect()
    };
    let after: String = text[end..].chars().take(CONTEXT_CHARS).collect();
    format!("{before}{}{after}", &text[start..end])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extractor() -> Arc<EntityExtractor> {
        EntityExtractor::builtin().unwrap()
    }

    fn spans(entities: &[ExtractedEntity]) -> Vec<(&str, EntityType)> {
        entities
            .iter()
            .map(|e| (e.text.as_str(), e.entity_type))
            .collect()
    }

    #[test]
    fn dictionary_terms_beat_regex_hits() {
        let entities = extractor().extract_entities("Netmera SDK requires API key configuration");
        assert_eq!(
            spans(&entities),
            vec![
                ("Netmera SDK", EntityType::Sdk),
                ("API key", EntityType::Api),
                ("configuration", EntityType::Configuration),
            ]
        );
        assert!((entities[0].confidence - 0.9).abs() < f32::EPSILON);
        assert!((entities[1].confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn bare_sdk_is_recognised() {
        let entities = extractor().extract_entities("what does the SDK need");
        assert_eq!(spans(&entities), vec![("SDK", EntityType::Sdk)]);
    }

    #[test]
    fn relationships_are_oriented_by_text_order() {
        let text = "Netmera SDK requires API key configuration";
        let ex = extractor();
        let entities = ex.extract_entities(text);
        let relations = ex.extract_relationships(text, &entities);

        let triples: Vec<(&str, &str, &str)> = relations
            .iter()
            .map(|r| (r.source.as_str(), r.target.as_str(), r.relation_type.as_str()))
            .collect();
        assert_eq!(
            triples,
            vec![
                ("Netmera SDK", "API key", "requires"),
                ("Netmera SDK", "configuration", "requires"),
            ]
        );
        assert_eq!(relations[0].source_id, "sdk_netmera_sdk");
        assert_eq!(relations[0].target_id, "api_api_key");
    }

    #[test]
    fn distant_pairs_are_ignored() {
        let filler = "x ".repeat(80);
        let text = format!("Android {filler} requires Gradle");
        let ex = extractor();
        let entities = ex.extract_entities(&text);
        assert_eq!(entities.len(), 2);
        assert!(ex.extract_relationships(&text, &entities).is_empty());
    }

    #[test]
    fn ambiguous_trigger_emits_each_relation_type() {
        let text = "iOS includes Geofencing";
        let ex = extractor();
        let entities = ex.extract_entities(text);
        let kinds: Vec<String> = ex
            .extract_relationships(text, &entities)
            .into_iter()
            .map(|r| r.relation_type.to_string())
            .collect();
        assert_eq!(kinds, vec!["implements".to_string(), "contains".to_string()]);
    }

    #[test]
    fn custom_table_drops_short_and_symbol_spans() {
        let table = PatternTable::from_json(
            r#"{
                "entity_patterns": [
                    {"type": "Code", "patterns": ["x", "--+", "\\bfoo\\b"]}
                ]
            }"#,
        )
        .unwrap();
        let ex = EntityExtractor::from_table(&table).unwrap();
        let entities = ex.extract_entities("x ---- foo");
        assert_eq!(spans(&entities), vec![("foo", EntityType::Code)]);
    }

    #[test]
    fn invalid_table_is_rejected() {
        let bad = PatternTable::from_json(r#"{"regex_confidence": 1.5}"#);
        assert!(matches!(bad, Err(GraphError::InvalidPatternTable(_))));

        let table = PatternTable::from_json(
            r#"{"entity_patterns": [{"type": "Code", "patterns": ["("]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            EntityExtractor::from_table(&table),
            Err(GraphError::PatternError(_))
        ));
    }

    #[test]
    fn context_window_is_bounded() {
        let long = format!("{} Flutter {}", "a".repeat(200), "b".repeat(200));
        let entities = extractor().extract_entities(&long);
        assert_eq!(entities.len(), 1);
        assert!(entities[0].context.chars().count() <= 50 + 7 + 50);
        assert!(entities[0].context.contains("Flutter"));
    }
}
