//! Per-field query annotations.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::filter::Predicate;

/// Canonical `(entity, field)` key of a column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    #[serde(alias = "table", alias = "collection")]
    pub entity: String,
    #[serde(alias = "column")]
    pub field: String,
}

impl FieldKey {
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.field)
    }
}

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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Accumulator {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    StdDevPop,
    StdDevSamp,
    Push,
    AddToSet,
    First,
    Last,
}

impl Accumulator {
    /// Whether the aggregate yields a number regardless of the input field.
    pub fn is_numeric_result(self) -> bool {
        matches!(
            self,
            Self::Count
                | Self::CountDistinct
                | Self::Sum
                | Self::Avg
                | Self::StdDevPop
                | Self::StdDevSamp
        )
    }

    /// Lower-case stem for generated output names (`sum_salary`).
    pub fn name_stem(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountDistinct => "count_distinct",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::StdDevPop => "stddev_pop",
            Self::StdDevSamp => "stddev_samp",
            Self::Push => "push",
            Self::AddToSet => "add_to_set",
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
    FirstValue,
    LastValue,
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl WindowFunction {
    /// Ranking functions take no column argument.
    pub fn takes_argument(self) -> bool {
        !matches!(self, Self::RowNumber | Self::Rank | Self::DenseRank)
    }

    pub fn name_stem(self) -> &'static str {
        match self {
            Self::RowNumber => "row_number",
            Self::Rank => "rank",
            Self::DenseRank => "dense_rank",
            Self::Lag => "lag",
            Self::Lead => "lead",
            Self::FirstValue => "first_value",
            Self::LastValue => "last_value",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

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
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderKey {
    #[serde(flatten)]
    pub key: FieldKey,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSpec {
    pub function: WindowFunction,
    #[serde(default)]
    pub partition_by: Vec<FieldKey>,
    #[serde(default)]
    pub order_by: Vec<OrderKey>,
    /// Row offset for `LAG`/`LEAD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl WindowSpec {
    pub fn new(function: WindowFunction) -> Self {
        Self {
            function,
            partition_by: Vec::new(),
            order_by: Vec::new(),
            offset: None,
        }
    }

    pub fn partition_by(mut self, key: FieldKey) -> Self {
        self.partition_by.push(key);
        self
    }

    pub fn order_by(mut self, key: FieldKey, direction: SortDirection) -> Self {
        self.order_by.push(OrderKey { key, direction });
        self
    }
}

/// What, if anything, is computed over the column. An accumulator and a
/// window can never be set together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Aggregation {
    #[default]
    None,
    Accumulator(Accumulator),
    Window(WindowSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub direction: SortDirection,
    /// Assigned when sorting was switched on; fixes ORDER BY sequence.
    pub sort_order: u64,
}

/// One annotated field reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ColumnRefDto", into = "ColumnRefDto")]
pub struct ColumnRef {
    pub key: FieldKey,
    /// Projected in the output. Unselected columns can still filter or sort.
    pub selected: bool,
    pub aggregation: Aggregation,
    pub sort: Option<Sort>,
    pub filter: Option<Predicate>,
    pub having: Option<Predicate>,
    pub alias: Option<String>,
    /// Raw expression used in place of the field reference.
    pub expression: Option<String>,
}

impl ColumnRef {
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            key: FieldKey::new(entity, field),
            selected: true,
            aggregation: Aggregation::None,
            sort: None,
            filter: None,
            having: None,
            alias: None,
            expression: None,
        }
    }

    pub fn with_accumulator(mut self, accumulator: Accumulator) -> Self {
        self.aggregation = Aggregation::Accumulator(accumulator);
        self
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.aggregation = Aggregation::Window(window);
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_having(mut self, having: Predicate) -> Self {
        self.having = Some(having);
        self
    }

    pub fn with_sort(mut self, direction: SortDirection, sort_order: u64) -> Self {
        self.sort = Some(Sort {
            direction,
            sort_order,
        });
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn unselected(mut self) -> Self {
        self.selected = false;
        self
    }

    pub fn accumulator(&self) -> Option<Accumulator> {
        match self.aggregation {
            Aggregation::Accumulator(acc) => Some(acc),
            _ => None,
        }
    }

    pub fn window(&self) -> Option<&WindowSpec> {
        match &self.aggregation {
            Aggregation::Window(spec) => Some(spec),
            _ => None,
        }
    }

    /// HAVING only applies while an accumulator is set; a stale predicate
    /// left behind after clearing the accumulator is ignored.
    pub fn effective_having(&self) -> Option<&Predicate> {
        self.accumulator().and(self.having.as_ref())
    }

    /// Candidate for implicit GROUP BY: selected, not aggregated, not windowed
    /// and not an opaque expression.
    pub fn is_group_candidate(&self) -> bool {
        self.selected && self.aggregation == Aggregation::None && self.expression().is_none()
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref().filter(|a| !a.trim().is_empty())
    }

    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Wire shape of a column reference: accumulator and window as two optional
/// fields, the way the UI sends them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnRefDto {
    #[serde(flatten)]
    key: FieldKey,
    #[serde(default = "default_selected")]
    selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accumulator: Option<Accumulator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    window: Option<WindowSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    having: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expression: Option<String>,
}

fn default_selected() -> bool {
    true
}

impl From<ColumnRefDto> for ColumnRef {
    fn from(dto: ColumnRefDto) -> Self {
        let aggregation = match (dto.accumulator, dto.window) {
            (Some(acc), Some(_)) => {
                log::warn!("{}: both accumulator and window set, keeping the accumulator", dto.key);
                Aggregation::Accumulator(acc)
            }
            (Some(acc), None) => Aggregation::Accumulator(acc),
            (None, Some(window)) => Aggregation::Window(window),
            (None, None) => Aggregation::None,
        };

        Self {
            key: dto.key,
            selected: dto.selected,
            aggregation,
            sort: dto.sort,
            filter: dto.filter,
            having: dto.having,
            alias: dto.alias,
            expression: dto.expression,
        }
    }
}

impl From<ColumnRef> for ColumnRefDto {
    fn from(col: ColumnRef) -> Self {
        let (accumulator, window) = match col.aggregation {
            Aggregation::None => (None, None),
            Aggregation::Accumulator(acc) => (Some(acc), None),
            Aggregation::Window(window) => (None, Some(window)),
        };

        Self {
            key: col.key,
            selected: col.selected,
            accumulator,
            window,
            sort: col.sort,
            filter: col.filter,
            having: col.having,
            alias: col.alias,
            expression: col.expression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::Operator;

    #[test]
    fn test_deserialize_ui_shape() {
        let col: ColumnRef = serde_json::from_str(
            r#"{"table": "employees", "column": "id", "accumulator": "COUNT",
                "having": {"operator": ">", "value": "5"}}"#,
        )
        .unwrap();
        assert_eq!(col.key, FieldKey::new("employees", "id"));
        assert!(col.selected);
        assert_eq!(col.accumulator(), Some(Accumulator::Count));
        assert_eq!(col.effective_having().map(|h| h.operator), Some(Operator::Gt));
    }

    #[test]
    fn test_deserialize_mongo_shape() {
        let col: ColumnRef =
            serde_json::from_str(r#"{"collection": "orders", "field": "total", "selected": false}"#).unwrap();
        assert_eq!(col.key, FieldKey::new("orders", "total"));
        assert!(!col.selected);
    }

    #[test]
    fn test_accumulator_wins_over_window() {
        let col: ColumnRef = serde_json::from_str(
            r#"{"entity": "e", "field": "f", "accumulator": "SUM", "window": {"function": "RANK"}}"#,
        )
        .unwrap();
        assert_eq!(col.aggregation, Aggregation::Accumulator(Accumulator::Sum));
    }

    #[test]
    fn test_stale_having_is_ignored() {
        let mut col = ColumnRef::new("e", "f").with_having(Predicate::new(Operator::Gt, "1"));
        assert!(col.effective_having().is_none());
        col.aggregation = Aggregation::Accumulator(Accumulator::Max);
        assert!(col.effective_having().is_some());
    }

    #[test]
    fn test_serialize_round_trips_window() {
        let col = ColumnRef::new("e", "salary").with_window(
            WindowSpec::new(WindowFunction::Rank).order_by(FieldKey::new("e", "salary"), SortDirection::Desc),
        );
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["window"]["function"], "RANK");
        assert_eq!(json["window"]["orderBy"][0]["direction"], "DESC");
        let back: ColumnRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, col);
    }

    #[test]
    fn test_group_candidate() {
        assert!(ColumnRef::new("e", "f").is_group_candidate());
        assert!(!ColumnRef::new("e", "f").with_accumulator(Accumulator::Sum).is_group_candidate());
        assert!(!ColumnRef::new("e", "f").with_expression("UPPER(e.f)").is_group_candidate());
        assert!(!ColumnRef::new("e", "f").unselected().is_group_candidate());
    }
}
