use crate::error::{Result, SearchError};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const BUILTIN_RULES: &str = include_str!("../data/router_rules.json");

pub const DEFAULT_STRATEGY_GAP: f32 = 0.3;

static BUILTIN_COMPILED: Lazy<std::result::Result<Arc<CompiledRules>, String>> =
    Lazy::new(|| {
        RuleTable::from_json(BUILTIN_RULES)
            .and_then(|table| CompiledRules::compile(&table))
            .map(Arc::new)
            .map_err(|e| e.to_string())
    });

/// How graph and vector results are weighted when merged.
///
/// Both branches always run; the strategy never excludes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    GraphFirst,
    VectorFirst,
    Balanced,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GraphFirst => "graph_first",
            Self::VectorFirst => "vector_first",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub graph_score: f32,
    pub vector_score: f32,
    pub strategy: Strategy,
}

/// Routing decision plus the rules that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingExplanation {
    pub query: String,
    pub strategy: Strategy,
    pub graph_score: f32,
    pub vector_score: f32,
    pub matched_graph_rules: Vec<String>,
    pub matched_vector_rules: Vec<String>,
    pub entity_count: usize,
    pub reasoning: String,
}

/// Declarative router configuration (see `data/router_rules.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTable {
    #[serde(default = "default_pattern_weight")]
    pub pattern_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default)]
    pub graph_rules: Vec<PatternRule>,
    #[serde(default)]
    pub vector_rules: Vec<PatternRule>,
    #[serde(default)]
    pub graph_keywords: Vec<String>,
    #[serde(default)]
    pub vector_keywords: Vec<String>,
    pub relationship_words: WeightedTerms,
    pub simple_starters: WeightedTerms,
    pub multi_entity: MultiEntityRule,
    pub short_query: ShortQueryRule,
}

/// A regex rule. When `unless` is set, a match only counts if `unless` does
/// not match anywhere after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default)]
    pub unless: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedTerms {
    pub weight: f32,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiEntityRule {
    pub weight: f32,
    pub min_count: usize,
    #[serde(default)]
    pub indicators: Vec<String>,
    /// Case-sensitive, applied to the query as typed (camelCase, PascalCase)
    #[serde(default)]
    pub token_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortQueryRule {
    pub weight: f32,
    pub max_words: usize,
}

const fn default_pattern_weight() -> f32 {
    0.3
}

const fn default_keyword_weight() -> f32 {
    0.2
}

impl RuleTable {
    pub fn from_json(raw: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_RULES)
    }

    fn validate(&self) -> Result<()> {
        let rule_weights = self
            .graph_rules
            .iter()
            .chain(&self.vector_rules)
            .filter_map(|rule| rule.weight.map(|w| (rule.name.as_str(), w)));
        let fixed = [
            ("pattern_weight", self.pattern_weight),
            ("keyword_weight", self.keyword_weight),
            ("relationship_words.weight", self.relationship_words.weight),
            ("simple_starters.weight", self.simple_starters.weight),
            ("multi_entity.weight", self.multi_entity.weight),
            ("short_query.weight", self.short_query.weight),
        ];
        for (label, weight) in fixed.into_iter().chain(rule_weights) {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::InvalidRules(format!(
                    "{label} must be a non-negative number, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

struct CompiledRule {
    name: String,
    regex: Regex,
    unless: Option<Regex>,
    weight: f32,
}

impl CompiledRule {
    fn compile(rule: &PatternRule, default_weight: f32) -> Result<Self> {
        Ok(Self {
            name: rule.name.clone(),
            regex: case_insensitive(&rule.pattern)?,
            unless: rule.unless.as_deref().map(case_insensitive).transpose()?,
            weight: rule.weight.unwrap_or(default_weight),
        })
    }

    fn matches(&self, text: &str) -> bool {
        match &self.unless {
            None => self.regex.is_match(text),
            Some(unless) => self
                .regex
                .find_iter(text)
                .any(|m| !unless.is_match(&text[m.end()..])),
        }
    }
}

struct CompiledRules {
    graph_rules: Vec<CompiledRule>,
    vector_rules: Vec<CompiledRule>,
    graph_keywords: Vec<String>,
    vector_keywords: Vec<String>,
    keyword_weight: f32,
    relationship_words: WeightedTerms,
    simple_starters: WeightedTerms,
    multi_entity_weight: f32,
    multi_entity_min: usize,
    entity_indicators: Vec<String>,
    entity_token_patterns: Vec<Regex>,
    short_query: ShortQueryRule,
}

impl CompiledRules {
    fn compile(table: &RuleTable) -> Result<Self> {
        let compile_all = |rules: &[PatternRule]| {
            rules
                .iter()
                .map(|rule| CompiledRule::compile(rule, table.pattern_weight))
                .collect::<Result<Vec<_>>>()
        };
        let lowercase_all =
            |terms: &[String]| terms.iter().map(|t| t.to_lowercase()).collect::<Vec<_>>();

        Ok(Self {
            graph_rules: compile_all(&table.graph_rules)?,
            vector_rules: compile_all(&table.vector_rules)?,
            graph_keywords: lowercase_all(&table.graph_keywords),
            vector_keywords: lowercase_all(&table.vector_keywords),
            keyword_weight: table.keyword_weight,
            relationship_words: WeightedTerms {
                weight: table.relationship_words.weight,
                terms: lowercase_all(&table.relationship_words.terms),
            },
            simple_starters: WeightedTerms {
                weight: table.simple_starters.weight,
                terms: lowercase_all(&table.simple_starters.terms),
            },
            multi_entity_weight: table.multi_entity.weight,
            multi_entity_min: table.multi_entity.min_count,
            entity_indicators: lowercase_all(&table.multi_entity.indicators),
            entity_token_patterns: table
                .multi_entity
                .token_patterns
                .iter()
                .map(|p| Regex::new(p).map_err(SearchError::from))
                .collect::<Result<Vec<_>>>()?,
            short_query: table.short_query.clone(),
        })
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// Per-query breakdown used by both `route` and `explain`
struct Scored {
    graph_score: f32,
    vector_score: f32,
    matched_graph_rules: Vec<String>,
    matched_vector_rules: Vec<String>,
    entity_count: usize,
}

/// Rule-based query router.
///
/// Scores graph affinity and vector affinity with additive, capped
/// increments and picks a [`Strategy`]. Total: every input, including the
/// empty string, yields a decision.
#[derive(Clone)]
pub struct QueryRouter {
    rules: Arc<CompiledRules>,
    strategy_gap: f32,
}

impl fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRouter")
            .field("graph_rules", &self.rules.graph_rules.len())
            .field("vector_rules", &self.rules.vector_rules.len())
            .field("strategy_gap", &self.strategy_gap)
            .finish()
    }
}

impl QueryRouter {
    /// Router over the embedded rule table
    pub fn builtin() -> Result<Self> {
        let rules = BUILTIN_COMPILED
            .as_ref()
            .map(Arc::clone)
            .map_err(|e| SearchError::InvalidRules(e.clone()))?;
        Ok(Self {
            rules,
            strategy_gap: DEFAULT_STRATEGY_GAP,
        })
    }

    pub fn from_table(table: &RuleTable) -> Result<Self> {
        Ok(Self {
            rules: Arc::new(CompiledRules::compile(table)?),
            strategy_gap: DEFAULT_STRATEGY_GAP,
        })
    }

    #[must_use]
    pub const fn with_strategy_gap(mut self, gap: f32) -> Self {
        self.strategy_gap = gap;
        self
    }

    pub const fn strategy_gap(&self) -> f32 {
        self.strategy_gap
    }

    pub fn route(&self, query: &str) -> RoutingDecision {
        let scored = self.score(query);
        let strategy = self.pick(scored.graph_score, scored.vector_score);
        log::debug!(
            "Routing '{}': graph={:.2} vector={:.2} -> {}",
            query,
            scored.graph_score,
            scored.vector_score,
            strategy
        );
        RoutingDecision {
            graph_score: scored.graph_score,
            vector_score: scored.vector_score,
            strategy,
        }
    }

    pub fn explain(&self, query: &str) -> RoutingExplanation {
        let scored = self.score(query);
        let strategy = self.pick(scored.graph_score, scored.vector_score);
        let reasoning = match strategy {
            Strategy::GraphFirst => format!(
                "Graph first (graph {:.2} vs vector {:.2}): the query involves relationships, workflows or several components",
                scored.graph_score, scored.vector_score
            ),
            Strategy::VectorFirst => format!(
                "Vector first (vector {:.2} vs graph {:.2}): the query asks for a definition, a setting or a single page",
                scored.vector_score, scored.graph_score
            ),
            Strategy::Balanced => format!(
                "Balanced (graph {:.2}, vector {:.2}): neither signal leads by more than {:.2}",
                scored.graph_score, scored.vector_score, self.strategy_gap
            ),
        };
        RoutingExplanation {
            query: query.to_string(),
            strategy,
            graph_score: scored.graph_score,
            vector_score: scored.vector_score,
            matched_graph_rules: scored.matched_graph_rules,
            matched_vector_rules: scored.matched_vector_rules,
            entity_count: scored.entity_count,
            reasoning,
        }
    }

    fn pick(&self, graph: f32, vector: f32) -> Strategy {
        if graph > vector + self.strategy_gap {
            Strategy::GraphFirst
        } else if vector > graph + self.strategy_gap {
            Strategy::VectorFirst
        } else {
            Strategy::Balanced
        }
    }

    fn score(&self, query: &str) -> Scored {
        let rules = &self.rules;
        let trimmed = query.trim();
        let lower = trimmed.to_lowercase();

        let mut graph = 0.0f32;
        let mut matched_graph_rules = Vec::new();
        for rule in &rules.graph_rules {
            if rule.matches(&lower) {
                graph += rule.weight;
                matched_graph_rules.push(rule.name.clone());
            }
        }
        graph += rules.keyword_weight * count_contained(&lower, &rules.graph_keywords);

        let entity_count = self.count_entities(trimmed, &lower);
        if entity_count >= rules.multi_entity_min {
            graph += rules.multi_entity_weight;
        }
        graph += rules.relationship_words.weight
            * count_contained(&lower, &rules.relationship_words.terms);

        let mut vector = 0.0f32;
        let mut matched_vector_rules = Vec::new();
        for rule in &rules.vector_rules {
            if rule.matches(&lower) {
                vector += rule.weight;
                matched_vector_rules.push(rule.name.clone());
            }
        }
        vector += rules.keyword_weight * count_contained(&lower, &rules.vector_keywords);
        if rules
            .simple_starters
            .terms
            .iter()
            .any(|starter| lower.starts_with(starter.as_str()))
        {
            vector += rules.simple_starters.weight;
        }
        if lower.split_whitespace().count() <= rules.short_query.max_words {
            vector += rules.short_query.weight;
        }

        Scored {
            graph_score: graph.min(1.0),
            vector_score: vector.min(1.0),
            matched_graph_rules,
            matched_vector_rules,
            entity_count,
        }
    }

    /// Indicator substrings in the lowercased query plus camel/Pascal-case
    /// tokens in the query as typed.
    fn count_entities(&self, original: &str, lower: &str) -> usize {
        let indicators = self
            .rules
            .entity_indicators
            .iter()
            .filter(|indicator| lower.contains(indicator.as_str()))
            .count();
        let tokens: usize = self
            .rules
            .entity_token_patterns
            .iter()
            .map(|re| re.find_iter(original).count())
            .sum();
        indicators + tokens
    }
}

fn count_contained(haystack: &str, needles: &[String]) -> f32 {
    needles
        .iter()
        .filter(|needle| haystack.contains(needle.as_str()))
        .count() as f32
}
