use docrag_corpus::CorpusError;
use docrag_graph::GraphError;
use docrag_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] VectorStoreError),

    #[error("Graph error: {0}")]
    GraphError(#[from] GraphError),

    #[error("Corpus error: {0}")]
    CorpusError(#[from] CorpusError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("Invalid rule table: {0}")]
    InvalidRules(String),

    #[error("Pattern error: {0}")]
    PatternError(#[from] regex::Error),

    #[error("{branch} branch timed out after {millis} ms")]
    BranchTimeout { branch: &'static str, millis: u64 },

    #[error("{0} branch cancelled")]
    BranchCancelled(&'static str),

    #[error("{branch} branch failed: {reason}")]
    BranchFailed { branch: &'static str, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
