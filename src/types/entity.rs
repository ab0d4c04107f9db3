//! Graph object wire model.
//!
//! Entities and relationships serialize with the persister's underscore-
//! prefixed field names (`_key`, `_type`, ...); free-form properties are
//! flattened alongside them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form graph object properties.
pub type GraphProperties = Map<String, Value>;

/// Named blob of provider raw data attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataEntry {
    pub name: String,
    #[serde(rename = "rawData")]
    pub raw_data: Map<String, Value>,
}

impl RawDataEntry {
    pub fn new(name: impl Into<String>, raw_data: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            raw_data,
        }
    }
}

/// A collected entity. `_key` is globally unique within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_class")]
    pub class: Vec<String>,
    #[serde(rename = "_rawData", default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Vec<RawDataEntry>>,
    #[serde(flatten)]
    pub properties: GraphProperties,
}

impl Entity {
    pub fn new(
        key: impl Into<String>,
        entity_type: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            entity_type: entity_type.into(),
            class: vec![class.into()],
            raw_data: None,
            properties: GraphProperties::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_raw_data(mut self, entry: RawDataEntry) -> Self {
        self.raw_data.get_or_insert_with(Vec::new).push(entry);
        self
    }
}

/// A collected relationship between two entities. Mapped relationships carry
/// a `_mapping` target descriptor instead of `_toEntityKey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub relationship_type: String,
    #[serde(rename = "_class", default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(rename = "_fromEntityKey")]
    pub from_entity_key: String,
    #[serde(
        rename = "_toEntityKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub to_entity_key: Option<String>,
    #[serde(rename = "_mapping", default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
    #[serde(flatten)]
    pub properties: GraphProperties,
}

impl Relationship {
    pub fn new(
        key: impl Into<String>,
        relationship_type: impl Into<String>,
        from_entity_key: impl Into<String>,
        to_entity_key: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            relationship_type: relationship_type.into(),
            class: None,
            from_entity_key: from_entity_key.into(),
            to_entity_key: Some(to_entity_key.into()),
            mapping: None,
            properties: GraphProperties::new(),
        }
    }

    /// A mapped relationship: the target is described rather than keyed.
    pub fn mapped(
        key: impl Into<String>,
        relationship_type: impl Into<String>,
        from_entity_key: impl Into<String>,
        mapping: Value,
    ) -> Self {
        Self {
            key: key.into(),
            relationship_type: relationship_type.into(),
            class: None,
            from_entity_key: from_entity_key.into(),
            to_entity_key: None,
            mapping: Some(mapping),
            properties: GraphProperties::new(),
        }
    }
}
