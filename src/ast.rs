use serde::{Deserialize, Serialize};

use crate::types::SemanticType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// A table or collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub fields: Vec<Field>,
    /// Display metadata from the `[key: value]` list. Ignored by the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub semantic_type: SemanticType,
    /// Type string as written, e.g. `decimal(10,2)`.
    pub raw_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
}

/// Directed edge: `source` references `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub source_entity: String,
    pub source_field: String,
    pub target_entity: String,
    pub target_field: String,
}

impl Schema {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn field(&self, entity: &str, field: &str) -> Option<&Field> {
        self.entity(entity)?.fields.iter().find(|f| f.name == field)
    }

    /// Semantic type of `entity.field`, if the schema declares it.
    pub fn field_type(&self, entity: &str, field: &str) -> Option<SemanticType> {
        self.field(entity, field).map(|f| f.semantic_type)
    }
}
