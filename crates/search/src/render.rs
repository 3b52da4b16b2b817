use crate::engine::RetrievalBundle;
use crate::router::Strategy;

const MAX_SOURCES: usize = 3;
const MAX_SOURCE_CHARS: usize = 1000;

/// Serialize a bundle into labeled sections for a generation prompt.
///
/// Empty branches are reported as such rather than omitted, so the reader
/// can tell "no graph context" from "graph not consulted".
pub fn render_context_for_prompt(bundle: &RetrievalBundle, query: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("=== HYBRID CONTEXT MERGE ===".to_string());
    lines.push(format!("Query: {query}"));
    lines.push(format!("Strategy: {}", bundle.routing.strategy));
    lines.push(format!(
        "Routing scores: graph {:.2}, vector {:.2}",
        bundle.routing.graph_score, bundle.routing.vector_score
    ));
    lines.push(format!("Confidence: {:.2}", bundle.combined_confidence));
    if let Some(expansion) = &bundle.expansion_used {
        lines.push(format!(
            "Expanded query ({}): added {}",
            expansion.language.as_str(),
            expansion.added_terms.join(", ")
        ));
    }
    if bundle.fallback_used {
        lines.push("Note: a retrieval branch degraded; context may be partial".to_string());
    }
    lines.push(String::new());

    lines.push("=== KNOWLEDGE GRAPH ===".to_string());
    match &bundle.graph_context {
        Some(graph) => {
            lines.push(format!(
                "Entities: {}, Relationships: {}, Confidence: {:.2}",
                graph.entities.len(),
                graph.relationships.len(),
                graph.confidence
            ));
            if !graph.textual_summary.is_empty() {
                lines.push(graph.textual_summary.clone());
            }
        }
        None => lines.push("No relevant graph context.".to_string()),
    }
    lines.push(String::new());

    lines.push("=== DOCUMENTATION ===".to_string());
    if bundle.vector_results.is_empty() {
        lines.push("No relevant documentation passages.".to_string());
        lines.push(String::new());
    }
    for (i, result) in bundle.vector_results.iter().take(MAX_SOURCES).enumerate() {
        let url = if result.url.is_empty() {
            "unknown"
        } else {
            result.url.as_str()
        };
        let text = result.chunk.preview(MAX_SOURCE_CHARS);
        let ellipsis = if text.len() < result.chunk.text.len() {
            "..."
        } else {
            ""
        };
        lines.push(format!("=== SOURCE {} ===", i + 1));
        lines.push(format!("Source: {}", result.source_label));
        lines.push(format!("URL: {url}"));
        lines.push(format!("Content: {text}{ellipsis}"));
        lines.push(String::new());
    }

    lines.push("=== USAGE PRIORITY ===".to_string());
    lines.push(usage_priority(bundle.routing.strategy).to_string());
    lines.push(String::new());
    lines.push("=== END HYBRID CONTEXT ===".to_string());

    lines.join("\n")
}

const fn usage_priority(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::GraphFirst => {
            "Lead with the knowledge graph relationships; use the documentation passages to confirm details."
        }
        Strategy::VectorFirst => {
            "Lead with the documentation passages; use the knowledge graph only for related context."
        }
        Strategy::Balanced => {
            "Weigh the knowledge graph and the documentation passages equally."
        }
    }
}
