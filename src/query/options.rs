//! Statement-level query options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::column::SortDirection;
use super::model::Query;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

/// How `$lookup` results are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupType {
    /// `$unwind` each lookup into a single embedded document.
    #[default]
    Unwind,
    /// Keep lookup results as arrays.
    Array,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

/// A nested query combined with the enclosing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOperation {
    #[serde(rename = "type")]
    pub kind: SetOperator,
    /// `UNION ALL` and friends.
    #[serde(default)]
    pub all: bool,
    pub query: Box<Query>,
}

/// Where a custom stage is spliced into the pipeline skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StagePosition {
    Start,
    AfterLookup,
    AfterMatch,
    #[default]
    AfterGroup,
    BeforeSort,
    BeforeProject,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub path: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CustomStageKind {
    #[serde(rename_all = "camelCase")]
    Unwind {
        path: String,
        #[serde(default)]
        preserve_null_and_empty_arrays: bool,
    },
    AddFields {
        fields: Map<String, Value>,
    },
    Set {
        fields: Map<String, Value>,
    },
    /// Full `$group` body, `_id` included.
    Group {
        spec: Map<String, Value>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    /// `{ field: { $operator: [args...] } }` added as a new field.
    Computed {
        field: String,
        operator: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomStage {
    #[serde(default)]
    pub position: StagePosition,
    #[serde(flatten)]
    pub stage: CustomStageKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub distinct: bool,
    pub group_by_all: bool,
    pub limit: Option<u64>,
    #[serde(alias = "skip")]
    pub offset: Option<u64>,
    pub join_type: JoinType,
    pub lookup_type: LookupType,
    /// Raw predicate ANDed after the generated filters. SQL text for the SQL
    /// generator, a JSON match document for the pipeline generator.
    pub custom_where: Option<String>,
    pub set_operations: Vec<SetOperation>,
    /// Pipeline-only stages.
    pub custom_stages: Vec<CustomStage>,
}

impl QueryOptions {
    pub fn custom_where(&self) -> Option<&str> {
        self.custom_where.as_deref().map(str::trim).filter(|w| !w.is_empty())
    }

    pub fn custom_stages_at(&self, position: StagePosition) -> impl Iterator<Item = &CustomStageKind> {
        self.custom_stages
            .iter()
            .filter(move |s| s.position == position)
            .map(|s| &s.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_options() {
        let options: QueryOptions = serde_json::from_str(
            r#"{
                "distinct": true,
                "limit": 10,
                "skip": 20,
                "joinType": "LEFT",
                "lookupType": "array",
                "customStages": [
                    {"type": "unwind", "path": "$tags", "preserveNullAndEmptyArrays": true},
                    {"type": "computed", "field": "total", "operator": "$multiply",
                     "args": ["$price", "$qty"], "position": "beforeSort"}
                ]
            }"#,
        )
        .unwrap();

        assert!(options.distinct);
        assert_eq!(options.offset, Some(20));
        assert_eq!(options.join_type, JoinType::Left);
        assert_eq!(options.lookup_type, LookupType::Array);
        assert_eq!(options.custom_stages[0].position, StagePosition::AfterGroup);
        assert_eq!(
            options.custom_stages[0].stage,
            CustomStageKind::Unwind {
                path: "$tags".into(),
                preserve_null_and_empty_arrays: true,
            }
        );
        assert_eq!(options.custom_stages_at(StagePosition::BeforeSort).count(), 1);
    }

    #[test]
    fn test_blank_custom_where_is_ignored() {
        let options = QueryOptions {
            custom_where: Some("   ".into()),
            ..QueryOptions::default()
        };
        assert_eq!(options.custom_where(), None);
    }
}
