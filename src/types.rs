//! Type-string to semantic type mapping.

use serde::{Deserialize, Serialize};

/// Coarse value class of a field, used for filter validation and literal
/// rendering.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SemanticType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
    Array,
    Object,
}

impl SemanticType {
    /// Normalize a type string from the schema DSL. Unknown types are strings.
    pub fn from_type_name(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if lower.ends_with("[]") {
            return Self::Array;
        }
        let base = lower.split('(').next().unwrap_or(&lower).trim();

        match base {
            // Numeric
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "serial" | "bigserial"
            | "long" | "float" | "double" | "real" | "decimal" | "numeric" | "number"
            | "objectid" => Self::Number,

            // Date/time
            "date" | "datetime" | "timestamp" | "timestamptz" | "time" => Self::Date,

            // Boolean
            "bool" | "boolean" => Self::Boolean,

            // Containers
            "array" | "list" => Self::Array,
            "object" | "json" | "jsonb" | "map" | "document" => Self::Object,

            _ => Self::String,
        }
    }
}
