//! Filter operators and predicates.

use serde::{Deserialize, Serialize};

/// Canonical filter operators. The SQL spelling is the wire name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Operator {
    #[serde(rename = "=")]
    #[strum(to_string = "=")]
    Eq,
    #[serde(rename = "!=", alias = "<>")]
    #[strum(to_string = "!=", serialize = "<>")]
    NotEq,
    #[serde(rename = ">")]
    #[strum(to_string = ">")]
    Gt,
    #[serde(rename = "<")]
    #[strum(to_string = "<")]
    Lt,
    #[serde(rename = ">=")]
    #[strum(to_string = ">=")]
    Gte,
    #[serde(rename = "<=")]
    #[strum(to_string = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    #[strum(to_string = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    #[strum(to_string = "NOT LIKE")]
    NotLike,
    #[serde(rename = "IN")]
    #[strum(to_string = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    #[strum(to_string = "NOT IN")]
    NotIn,
    #[serde(rename = "BETWEEN")]
    #[strum(to_string = "BETWEEN")]
    Between,
    #[serde(rename = "NOT BETWEEN")]
    #[strum(to_string = "NOT BETWEEN")]
    NotBetween,
    #[serde(rename = "IS NULL")]
    #[strum(to_string = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    #[strum(to_string = "IS NOT NULL")]
    IsNotNull,
    #[serde(rename = "EXISTS")]
    #[strum(to_string = "EXISTS")]
    Exists,
}

impl Operator {
    pub fn needs_value(self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull | Self::Exists)
    }

    pub fn needs_second_value(self) -> bool {
        matches!(self, Self::Between | Self::NotBetween)
    }

    /// `IN`/`NOT IN` take a comma-separated list.
    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Pattern operators compare against text whatever the field type.
    pub fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::NotLike)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<String>,
}

impl Predicate {
    pub fn new(operator: Operator, value: impl Into<String>) -> Self {
        Self {
            operator,
            value: value.into(),
            value2: None,
        }
    }

    pub fn between(operator: Operator, low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            operator,
            value: low.into(),
            value2: Some(high.into()),
        }
    }

    pub fn unary(operator: Operator) -> Self {
        Self::new(operator, "")
    }

    pub fn value(&self) -> &str {
        self.value.trim()
    }

    pub fn second_value(&self) -> Option<&str> {
        self.value2.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// Items of an `IN` list, trimmed, empty items dropped.
    pub fn list_values(&self) -> Vec<&str> {
        split_list(&self.value)
    }

    /// All values the operator requires are present.
    pub fn is_complete(&self) -> bool {
        let op = self.operator;
        if op.takes_list() {
            return !self.list_values().is_empty();
        }
        if op.needs_value() && self.value().is_empty() {
            return false;
        }
        !op.needs_second_value() || self.second_value().is_some()
    }
}

pub fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty()).collect()
}
