use crate::error::{Result, SearchError};
use crate::fusion::FusionConfig;
use crate::lexical::Bm25Config;
use crate::query_expansion::ExpansionConfig;
use crate::router::DEFAULT_STRATEGY_GAP;
use docrag_graph::{DEFAULT_MAX_ENTITIES, DEFAULT_MAX_HOPS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration. Every field has a default, so an empty TOML file
/// (or a file with only some sections) is valid.
///
/// ```toml
/// [fusion]
/// bm25_weight = 0.3
/// vector_weight = 0.7
///
/// [orchestrator]
/// branch_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fusion: FusionConfig,
    pub lexical: Bm25Config,
    pub graph: GraphConfig,
    pub router: RouterConfig,
    pub expansion: ExpansionConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_entities: usize,
    pub max_hops: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_entities: DEFAULT_MAX_ENTITIES,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Score lead one side needs before the strategy leaves `Balanced`
    pub strategy_gap: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy_gap: DEFAULT_STRATEGY_GAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub default_k: usize,
    pub branch_timeout_ms: u64,

    /// Lower bound on merged vector results after a second round
    pub merge_cap: usize,

    /// Result count at which vector quality stops being penalised
    pub target_docs: usize,

    /// Entities plus relationships at which graph richness saturates
    pub richness_target: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            branch_timeout_ms: 10_000,
            merge_cap: 10,
            target_docs: 3,
            richness_target: 8,
        }
    }
}

impl OrchestratorConfig {
    pub const fn branch_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SearchError::InvalidConfig(format!("cannot serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.fusion.validate()?;
        self.expansion.validate()?;

        let lexical = &self.lexical;
        if !lexical.k1.is_finite() || lexical.k1 < 0.0 {
            return Err(invalid("lexical.k1 must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&lexical.b) {
            return Err(invalid("lexical.b must be within [0, 1]"));
        }
        if self.graph.max_entities == 0 {
            return Err(invalid("graph.max_entities must be positive"));
        }
        if !(0.0..=1.0).contains(&self.router.strategy_gap) {
            return Err(invalid("router.strategy_gap must be within [0, 1]"));
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.default_k == 0 {
            return Err(invalid("orchestrator.default_k must be positive"));
        }
        if orchestrator.branch_timeout_ms == 0 {
            return Err(invalid("orchestrator.branch_timeout_ms must be positive"));
        }
        if orchestrator.target_docs == 0 || orchestrator.richness_target == 0 {
            return Err(invalid(
                "orchestrator.target_docs and orchestrator.richness_target must be positive",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SearchError {
    SearchError::InvalidConfig(message.to_string())
}
