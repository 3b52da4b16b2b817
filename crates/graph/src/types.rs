use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form entity/relationship attributes
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Kind of domain concept a graph node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "SDK")]
    Sdk,
    #[serde(rename = "API")]
    Api,
    Feature,
    Platform,
    Configuration,
    Error,
    Procedure,
    Code,
}

impl EntityType {
    pub const ALL: [Self; 8] = [
        Self::Sdk,
        Self::Api,
        Self::Feature,
        Self::Platform,
        Self::Configuration,
        Self::Error,
        Self::Procedure,
        Self::Code,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sdk => "SDK",
            Self::Api => "API",
            Self::Feature => "Feature",
            Self::Platform => "Platform",
            Self::Configuration => "Configuration",
            Self::Error => "Error",
            Self::Procedure => "Procedure",
            Self::Code => "Code",
        }
    }

    /// Case-insensitive parse of the display name
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed relation label. Unknown labels survive a load/save round trip as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    Requires,
    Provides,
    Implements,
    Configures,
    Uses,
    Contains,
    Supports,
    Other(String),
}

impl RelationType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Requires => "requires",
            Self::Provides => "provides",
            Self::Implements => "implements",
            Self::Configures => "configures",
            Self::Uses => "uses",
            Self::Contains => "contains",
            Self::Supports => "supports",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for RelationType {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "requires" => Self::Requires,
            "provides" => Self::Provides,
            "implements" => Self::Implements,
            "configures" => Self::Configures,
            "uses" => Self::Uses,
            "contains" => Self::Contains,
            "supports" => Self::Supports,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for RelationType {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<RelationType> for String {
    fn from(relation: RelationType) -> Self {
        relation.as_str().to_string()
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node of the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Properties,
}

impl GraphEntity {
    /// New entity with the derived id `{type_lower}_{normalized_name}`
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let name = name.into();
        Self {
            id: entity_id(&name, entity_type),
            name,
            entity_type,
            description: String::new(),
            properties: Properties::new(),
        }
    }

    /// Entity with an explicit (curated) id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            description: String::new(),
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Directed, typed edge. Parallel edges with different relation types are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Properties,
}

impl GraphRelationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: impl Into<RelationType>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            description: String::new(),
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Stable entity id: lowercased name, whitespace runs collapsed to `_`,
/// non-word characters dropped, prefixed by the lowercased type.
#[must_use]
pub fn entity_id(name: &str, entity_type: EntityType) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_space = false;
    for ch in name.trim().to_lowercase().chars() {
        if ch.is_whitespace() {
            if !in_space {
                normalized.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_alphanumeric() || ch == '_' {
            normalized.push(ch);
        }
    }
    format!("{}_{normalized}", entity_type.as_str().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_normalizes_name() {
        assert_eq!(entity_id("Netmera SDK", EntityType::Sdk), "sdk_netmera_sdk");
        assert_eq!(entity_id("  A/B   Testing ", EntityType::Feature), "feature_ab_testing");
        assert_eq!(entity_id("Info.plist", EntityType::Configuration), "configuration_infoplist");
        assert_eq!(
            GraphEntity::new("Push Notifications", EntityType::Feature).id,
            "feature_push_notifications"
        );
    }

    #[test]
    fn relation_type_roundtrips_unknown_labels() {
        assert_eq!(RelationType::from("Requires"), RelationType::Requires);
        let other = RelationType::from("feeds_into");
        assert_eq!(other, RelationType::Other("feeds_into".to_string()));

        let json = serde_json::to_string(&other).unwrap();
        assert_eq!(json, "\"feeds_into\"");
        let back: RelationType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, other);
    }

    #[test]
    fn entity_type_serializes_display_names() {
        assert_eq!(serde_json::to_string(&EntityType::Sdk).unwrap(), "\"SDK\"");
        assert_eq!(EntityType::parse("configuration"), Some(EntityType::Configuration));
        assert_eq!(EntityType::parse("unknown"), None);
    }
}
