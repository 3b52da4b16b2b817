use serde::{Deserialize, Serialize};

/// A documentation passage with metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Stable identifier (assigned at ingestion)
    pub id: String,

    /// Passage text, never mutated after load
    pub text: String,

    /// Source/location metadata
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }

    /// Label shown next to a result (source name, falling back to the id)
    #[must_use]
    pub fn source_label(&self) -> &str {
        if self.metadata.source.trim().is_empty() {
            &self.id
        } else {
            &self.metadata.source
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.metadata.url
    }

    /// Text truncated to `max_chars` characters (char-boundary safe)
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &self.text[..byte_idx],
            None => &self.text,
        }
    }
}

/// Metadata about a chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Source collection (e.g. "developer-guide", "faq")
    #[serde(default)]
    pub source: String,

    /// Canonical documentation URL
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub content_type: ContentType,

    /// Technical terms detected at ingestion
    #[serde(default)]
    pub tech_terms: Vec<String>,

    /// ISO language code ("en", "tr", ...)
    #[serde(default)]
    pub language: Option<String>,
}

impl ChunkMetadata {
    pub fn with_source(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Builder: set content type
    #[must_use]
    pub const fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Builder: add technical term
    #[must_use]
    pub fn add_tech_term(mut self, term: impl Into<String>) -> Self {
        self.tech_terms.push(term.into());
        self
    }

    /// Builder: set language
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Kind of documentation page a chunk was cut from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Guide,
    ApiReference,
    Tutorial,
    Faq,
    Troubleshooting,
    CodeSample,
    #[default]
    #[serde(other)]
    Other,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guide => "guide",
            Self::ApiReference => "api_reference",
            Self::Tutorial => "tutorial",
            Self::Faq => "faq",
            Self::Troubleshooting => "troubleshooting",
            Self::CodeSample => "code_sample",
            Self::Other => "other",
        }
    }
}
