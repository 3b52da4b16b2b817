use crate::extractor::EntityExtractor;
use crate::store::{EntityMatch, KnowledgeGraph};
use crate::types::{EntityType, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_MAX_ENTITIES: usize = 5;
pub const DEFAULT_MAX_HOPS: usize = 2;

const SUMMARY_ENTITY_LIMIT: usize = 10;
const SUMMARY_RELATIONSHIP_LIMIT: usize = 15;
const DIRECT_SEARCH_LIMIT: usize = 2;
const DIRECT_SEARCH_CONFIDENCE: f32 = 0.6;
const TOKEN_SEARCH_CONFIDENCE: f32 = 0.5;
const MIN_TOKEN_CHARS: usize = 3;
const COVERAGE_TARGET: f32 = 10.0;
const MATCH_SCORE_SCALE: f32 = 10.0;

pub const EXPANDED_CONTEXT_LABEL: &str = "### Expanded query context";

/// Entity in a retrieved subgraph; anchors have `hop_distance == 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntityHit {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub description: String,
    pub hop_distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationHit {
    pub source_id: String,
    pub target_id: String,
    pub source_name: String,
    pub target_name: String,
    pub relation_type: RelationType,
    pub description: String,
}

impl GraphRelationHit {
    fn key(&self) -> (String, String, RelationType) {
        (
            self.source_id.clone(),
            self.target_id.clone(),
            self.relation_type.clone(),
        )
    }
}

/// Subgraph relevant to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub entities: Vec<GraphEntityHit>,
    pub relationships: Vec<GraphRelationHit>,
    pub textual_summary: String,
    pub confidence: f32,
}

impl GraphContext {
    /// No anchors found: a normal outcome, not an error
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entities: Vec::new(),
            relationships: Vec::new(),
            textual_summary: String::new(),
            confidence: 0.0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Union with a later-round context.
    ///
    /// Entities dedup by id (smallest hop distance kept), relationships by
    /// `(source, target, relation)`. Confidence is the max of both. The other
    /// summary is appended under [`EXPANDED_CONTEXT_LABEL`] when both are
    /// non-empty; an empty first summary is simply replaced.
    pub fn merge(&mut self, other: Self) {
        let mut positions: HashMap<String, usize> = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        for entity in other.entities {
            match positions.get(&entity.id) {
                Some(&i) => {
                    let existing = &mut self.entities[i];
                    existing.hop_distance = existing.hop_distance.min(entity.hop_distance);
                }
                None => {
                    positions.insert(entity.id.clone(), self.entities.len());
                    self.entities.push(entity);
                }
            }
        }

        let mut seen: HashSet<_> = self.relationships.iter().map(GraphRelationHit::key).collect();
        for relationship in other.relationships {
            if seen.insert(relationship.key()) {
                self.relationships.push(relationship);
            }
        }

        self.confidence = self.confidence.max(other.confidence);

        if self.textual_summary.is_empty() {
            self.textual_summary = other.textual_summary;
        } else if !other.textual_summary.is_empty() {
            self.textual_summary.push_str("\n\n");
            self.textual_summary.push_str(EXPANDED_CONTEXT_LABEL);
            self.textual_summary.push('\n');
            self.textual_summary.push_str(&other.textual_summary);
        }
    }
}

#[derive(Debug, Clone)]
struct Anchor {
    id: String,
    match_score: u32,
    extraction_confidence: f32,
}

impl Anchor {
    fn from_match(m: &EntityMatch<'_>, extraction_confidence: f32) -> Self {
        Self {
            id: m.entity.id.clone(),
            match_score: m.match_score,
            extraction_confidence,
        }
    }

    fn rank(&self) -> f32 {
        self.match_score as f32 + self.extraction_confidence
    }
}

/// Expands a query into a relevant subgraph of the knowledge graph
#[derive(Debug, Clone)]
pub struct GraphRetriever {
    graph: Arc<KnowledgeGraph>,
    extractor: Arc<EntityExtractor>,
}

impl GraphRetriever {
    pub const fn new(graph: Arc<KnowledgeGraph>, extractor: Arc<EntityExtractor>) -> Self {
        Self { graph, extractor }
    }

    #[must_use]
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    #[must_use]
    pub fn retrieve(&self, query: &str, max_entities: usize, max_hops: usize) -> GraphContext {
        let anchors = self.find_anchors(query);
        if anchors.is_empty() {
            log::debug!("No anchor entities for query: {query}");
            return GraphContext::empty();
        }

        let mut entities = Vec::new();
        let mut relationships = Vec::new();
        let mut entity_positions: HashMap<String, usize> = HashMap::new();
        let mut seen_relationships = HashSet::new();

        for anchor in anchors.iter().take(max_entities) {
            let Some(anchor_entity) = self.graph.get_entity(&anchor.id) else {
                continue;
            };
            collect_entity(&mut entities, &mut entity_positions, anchor_entity, 0);

            for neighbor in self.graph.get_neighbors(&anchor.id, max_hops, None) {
                let neighbor_entity = neighbor.entity;
                collect_entity(
                    &mut entities,
                    &mut entity_positions,
                    neighbor_entity,
                    neighbor.hop_distance,
                );

                let outgoing = self
                    .graph
                    .edges_between(&anchor_entity.id, &neighbor_entity.id)
                    .map(|rel| (rel, anchor_entity, neighbor_entity));
                let incoming = self
                    .graph
                    .edges_between(&neighbor_entity.id, &anchor_entity.id)
                    .map(|rel| (rel, neighbor_entity, anchor_entity));

                for (rel, source, target) in outgoing.chain(incoming) {
                    let relation = GraphRelationHit {
                        source_id: source.id.clone(),
                        target_id: target.id.clone(),
                        source_name: source.name.clone(),
                        target_name: target.name.clone(),
                        relation_type: rel.relation_type.clone(),
                        description: rel.description.clone(),
                    };
                    if seen_relationships.insert(relation.key()) {
                        relationships.push(relation);
                    }
                }
            }
        }

        let textual_summary = summarize(&entities, &relationships, query);
        let confidence = confidence(&anchors, entities.len());

        log::debug!(
            "Graph retrieval: {} anchors, {} entities, {} relationships, confidence {confidence:.2}",
            anchors.len(),
            entities.len(),
            relationships.len()
        );

        GraphContext {
            entities,
            relationships,
            textual_summary,
            confidence,
        }
    }

    /// Anchors ranked by `match_score + extraction_confidence`, deduped by id
    fn find_anchors(&self, query: &str) -> Vec<Anchor> {
        let mut anchors: Vec<Anchor> = Vec::new();

        for extracted in self.extractor.extract_entities(query) {
            if let Some(best) = self.graph.search_entities(&extracted.text, 1).first() {
                anchors.push(Anchor::from_match(best, extracted.confidence));
            }
        }

        for m in self.graph.search_entities(query, DIRECT_SEARCH_LIMIT) {
            anchors.push(Anchor::from_match(&m, DIRECT_SEARCH_CONFIDENCE));
        }

        if anchors.is_empty() {
            let mut seen_tokens = HashSet::new();
            for token in query.unicode_words() {
                let token = token.to_lowercase();
                if token.chars().count() < MIN_TOKEN_CHARS || !seen_tokens.insert(token.clone()) {
                    continue;
                }
                if let Some(best) = self.graph.search_entities(&token, 1).first() {
                    anchors.push(Anchor::from_match(best, TOKEN_SEARCH_CONFIDENCE));
                }
            }
        }

        let mut best: HashMap<String, Anchor> = HashMap::new();
        for anchor in anchors {
            match best.get(&anchor.id) {
                Some(existing) if existing.rank() >= anchor.rank() => {}
                _ => {
                    best.insert(anchor.id.clone(), anchor);
                }
            }
        }

        let mut ranked: Vec<Anchor> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.rank()
                .partial_cmp(&a.rank())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }
}

/// Add `entity` once; a repeat sighting keeps the smaller hop distance.
fn collect_entity(
    entities: &mut Vec<GraphEntityHit>,
    positions: &mut HashMap<String, usize>,
    entity: &crate::types::GraphEntity,
    hop_distance: usize,
) {
    match positions.get(&entity.id) {
        Some(&i) => {
            let existing = &mut entities[i];
            existing.hop_distance = existing.hop_distance.min(hop_distance);
        }
        None => {
            positions.insert(entity.id.clone(), entities.len());
            entities.push(hit(entity, hop_distance));
        }
    }
}

fn hit(entity: &crate::types::GraphEntity, hop_distance: usize) -> GraphEntityHit {
    GraphEntityHit {
        id: entity.id.clone(),
        name: entity.name.clone(),
        entity_type: entity.entity_type,
        description: entity.description.clone(),
        hop_distance,
    }
}

fn confidence(anchors: &[Anchor], entity_count: usize) -> f32 {
    if anchors.is_empty() {
        return 0.0;
    }
    let n = anchors.len() as f32;
    let anchor_confidence = anchors.iter().map(|a| a.extraction_confidence).sum::<f32>() / n;
    let coverage = (entity_count as f32 / COVERAGE_TARGET).min(1.0);
    let match_strength =
        (anchors.iter().map(|a| a.match_score as f32).sum::<f32>() / (n * MATCH_SCORE_SCALE))
            .min(1.0);

    (0.5 * anchor_confidence + 0.3 * coverage + 0.2 * match_strength).clamp(0.0, 1.0)
}

fn summarize(entities: &[GraphEntityHit], relationships: &[GraphRelationHit], query: &str) -> String {
    if entities.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Relevant Entities:\n");
    for entity in entities.iter().take(SUMMARY_ENTITY_LIMIT) {
        let _ = write!(out, "- **{}** ({})", entity.name, entity.entity_type);
        if !entity.description.is_empty() {
            let _ = write!(out, ": {}", entity.description);
        }
        if entity.hop_distance > 0 {
            let _ = write!(out, " [Distance: {} hops]", entity.hop_distance);
        }
        out.push('\n');
    }

    if !relationships.is_empty() {
        out.push_str("\n## Relationships:\n");
        for rel in relationships.iter().take(SUMMARY_RELATIONSHIP_LIMIT) {
            let _ = write!(
                out,
                "- {} --{}--> {}",
                rel.source_name, rel.relation_type, rel.target_name
            );
            if !rel.description.is_empty() {
                let _ = write!(out, ": {}", rel.description);
            }
            out.push('\n');
        }

        let _ = write!(
            out,
            "\n## Summary:\nFound {} related entities and {} relationships relevant to the query about: {query}",
            entities.len(),
            relationships.len()
        );
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GraphEntity, GraphRelationship};
    use pretty_assertions::assert_eq;

    fn retriever() -> GraphRetriever {
        let graph = KnowledgeGraph::from_parts(
            vec![
                GraphEntity::with_id("netmera_sdk", "Netmera SDK", EntityType::Sdk)
                    .description("Main Netmera SDK for mobile platforms"),
                GraphEntity::with_id("api_key_config", "API Key Configuration", EntityType::Configuration)
                    .description("Set up API key"),
                GraphEntity::with_id("android_platform", "Android", EntityType::Platform)
                    .description("Google Android platform"),
                GraphEntity::with_id("gradle_config", "Gradle Configuration", EntityType::Configuration)
                    .description("Android Gradle setup"),
            ],
            vec![
                GraphRelationship::new("netmera_sdk", "api_key_config", RelationType::Requires)
                    .description("SDK requires API key configuration"),
                GraphRelationship::new("netmera_sdk", "android_platform", RelationType::Supports),
                GraphRelationship::new("android_platform", "gradle_config", RelationType::Requires),
            ],
        )
        .unwrap();
        GraphRetriever::new(Arc::new(graph), EntityExtractor::builtin().unwrap())
    }

    #[test]
    fn sdk_query_reaches_requires_edge() {
        let ctx = retriever().retrieve("what does the SDK need", 5, 2);

        let ids: Vec<&str> = ctx.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids[0], "netmera_sdk");
        assert!(ids.contains(&"api_key_config"));
        assert_eq!(ctx.entities[0].hop_distance, 0);

        assert!(ctx.relationships.iter().any(|r| r.source_id == "netmera_sdk"
            && r.target_id == "api_key_config"
            && r.relation_type == RelationType::Requires));
        assert!(ctx
            .textual_summary
            .contains("Netmera SDK --requires--> API Key Configuration: SDK requires API key configuration"));
        assert!(ctx.confidence > 0.0 && ctx.confidence <= 1.0);
    }

    #[test]
    fn anchor_edges_are_collected_in_both_directions() {
        let ctx = retriever().retrieve("Android Gradle", 5, 1);
        let triples: Vec<(&str, &str)> = ctx
            .relationships
            .iter()
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();
        assert!(triples.contains(&("android_platform", "gradle_config")));
        assert!(ctx.entities.iter().all(|e| e.hop_distance <= 1));
    }

    #[test]
    fn unknown_query_yields_empty_context() {
        let ctx = retriever().retrieve("zzz qqq", 5, 2);
        assert_eq!(ctx, GraphContext::empty());
        assert!(ctx.is_empty());
    }

    #[test]
    fn token_fallback_finds_partial_names() {
        let ctx = retriever().retrieve("netmera rocks", 5, 0);
        assert_eq!(ctx.entities.len(), 1);
        assert_eq!(ctx.entities[0].id, "netmera_sdk");
        assert!(ctx.relationships.is_empty());
        assert!(!ctx.textual_summary.contains("## Relationships"));
    }

    #[test]
    fn merge_unions_and_labels_continuation() {
        let r = retriever();
        let mut first = r.retrieve("what does the SDK need", 5, 1);
        let second = r.retrieve("Gradle Configuration", 5, 1);
        let before = first.entities.len();

        first.merge(second.clone());
        assert!(first.entities.len() >= before);
        assert!(first.entities.iter().any(|e| e.id == "gradle_config"));
        assert!(first.textual_summary.contains(EXPANDED_CONTEXT_LABEL));
        assert!((first.confidence - first.confidence.max(second.confidence)).abs() < f32::EPSILON);

        let mut keys = HashSet::new();
        assert!(first.relationships.iter().all(|rel| keys.insert(rel.key())));
    }

    #[test]
    fn anchor_reached_as_neighbor_keeps_hop_zero() {
        let graph = KnowledgeGraph::from_parts(
            vec![
                GraphEntity::with_id("alpha_widget", "Alpha Widget", EntityType::Feature),
                GraphEntity::with_id("beta_widget", "Beta Widget", EntityType::Feature),
            ],
            vec![GraphRelationship::new("alpha_widget", "beta_widget", RelationType::Uses)],
        )
        .unwrap();
        let retriever = GraphRetriever::new(Arc::new(graph), EntityExtractor::builtin().unwrap());

        let ctx = retriever.retrieve("alpha beta", 5, 2);
        let hops: Vec<(&str, usize)> = ctx
            .entities
            .iter()
            .map(|e| (e.id.as_str(), e.hop_distance))
            .collect();
        assert_eq!(hops, vec![("alpha_widget", 0), ("beta_widget", 0)]);
    }

    #[test]
    fn merge_into_empty_summary_has_no_label() {
        let r = retriever();
        let mut first = GraphContext::empty();
        let second = r.retrieve("Gradle Configuration", 5, 1);
        assert!(!second.textual_summary.is_empty());

        first.merge(second.clone());
        assert_eq!(first.textual_summary, second.textual_summary);
        assert!(!first.textual_summary.contains(EXPANDED_CONTEXT_LABEL));
    }
}
