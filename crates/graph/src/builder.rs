use crate::extractor::EntityExtractor;
use crate::store::KnowledgeGraph;
use crate::types::{GraphEntity, GraphRelationship};
use std::sync::Arc;

/// Counts from one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub entities_seen: usize,
    pub entities_added: usize,
    pub relationships_added: usize,
}

/// Offline graph construction from documentation text.
///
/// Ingestion runs outside the query path; the retrieval engine only reads
/// the resulting graph.
pub struct GraphBuilder {
    extractor: Arc<EntityExtractor>,
}

impl GraphBuilder {
    pub const fn new(extractor: Arc<EntityExtractor>) -> Self {
        Self { extractor }
    }

    /// Extract entities and relationships from `text` into `graph`.
    ///
    /// Existing entities are left as they are (curated descriptions win over
    /// extracted context). A relationship is added only if no edge with the
    /// same `(source, target, relation)` exists yet, so re-ingesting the same
    /// text is a no-op.
    pub fn ingest(&self, graph: &mut KnowledgeGraph, text: &str, source_url: &str) -> IngestStats {
        let entities = self.extractor.extract_entities(text);
        let mut stats = IngestStats {
            entities_seen: entities.len(),
            ..Default::default()
        };

        for extracted in &entities {
            let id = extracted.entity_id();
            if graph.contains(&id) {
                continue;
            }
            let mut entity = GraphEntity::new(extracted.text.trim(), extracted.entity_type)
                .description(extracted.context.clone())
                .property("confidence", f64::from(extracted.confidence));
            if !source_url.is_empty() {
                entity = entity.property("source_url", source_url);
            }
            graph.add_entity(entity);
            stats.entities_added += 1;
        }

        for relation in self.extractor.extract_relationships(text, &entities) {
            if relation.source_id == relation.target_id
                || graph.has_relationship(
                    &relation.source_id,
                    &relation.target_id,
                    &relation.relation_type,
                )
            {
                continue;
            }
            let description = format!(
                "{} {} {}",
                relation.source, relation.relation_type, relation.target
            );
            let mut relationship = GraphRelationship::new(
                relation.source_id,
                relation.target_id,
                relation.relation_type,
            )
            .description(description);
            if !source_url.is_empty() {
                relationship = relationship.property("source_url", source_url);
            }
            match graph.add_relationship(relationship) {
                Ok(()) => stats.relationships_added += 1,
                Err(err) => log::debug!("Skipped extracted relationship: {err}"),
            }
        }

        log::debug!(
            "Ingested {source_url}: {} entities added, {} relationships added",
            stats.entities_added,
            stats.relationships_added
        );
        stats
    }
}
