//! A query definition and the edits the builder UI applies to it.

use serde::{Deserialize, Serialize};

use super::column::{Accumulator, Aggregation, ColumnRef, FieldKey, Sort, SortDirection, WindowSpec};
use super::filter::Predicate;
use super::options::QueryOptions;
use super::value::{validate_predicate, ValueError};
use crate::ast::Schema;
use crate::types::SemanticType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("no column `{0}` in the query")]
    UnknownColumn(FieldKey),
    #[error("`{0}` has no accumulator; HAVING needs one")]
    HavingWithoutAccumulator(FieldKey),
    #[error("invalid value for `{key}`: {source}")]
    InvalidValue {
        key: FieldKey,
        #[source]
        source: ValueError,
    },
}

/// Ordered column annotations plus statement options.
///
/// Column order is first-selection order; it fixes the root entity and the
/// projection order. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub columns: Vec<ColumnRef>,
    pub options: QueryOptions,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, column: ColumnRef) -> Self {
        self.upsert(column);
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn column(&self, key: &FieldKey) -> Option<&ColumnRef> {
        self.columns.iter().find(|c| &c.key == key)
    }

    fn column_mut(&mut self, key: &FieldKey) -> Result<&mut ColumnRef, QueryError> {
        self.columns
            .iter_mut()
            .find(|c| &c.key == key)
            .ok_or_else(|| QueryError::UnknownColumn(key.clone()))
    }

    /// Insert or replace by key. A replaced column keeps its position.
    pub fn upsert(&mut self, column: ColumnRef) {
        match self.columns.iter_mut().find(|c| c.key == column.key) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    /// Mark a field selected, adding it if needed.
    pub fn select(&mut self, key: FieldKey) -> &mut ColumnRef {
        let index = match self.columns.iter().position(|c| c.key == key) {
            Some(index) => index,
            None => {
                self.columns.push(ColumnRef::new(key.entity, key.field));
                self.columns.len() - 1
            }
        };
        let column = &mut self.columns[index];
        column.selected = true;
        column
    }

    pub fn remove(&mut self, key: &FieldKey) -> Option<ColumnRef> {
        let index = self.columns.iter().position(|c| &c.key == key)?;
        Some(self.columns.remove(index))
    }

    /// Drop every annotation and reset the options.
    pub fn clear_all(&mut self) {
        self.columns.clear();
        self.options = QueryOptions::default();
    }

    /// Setting an accumulator clears any window; clearing it also clears the
    /// HAVING predicate that depended on it.
    pub fn set_accumulator(&mut self, key: &FieldKey, accumulator: Option<Accumulator>) -> Result<(), QueryError> {
        let column = self.column_mut(key)?;
        match accumulator {
            Some(acc) => column.aggregation = Aggregation::Accumulator(acc),
            None => {
                if column.accumulator().is_some() {
                    column.aggregation = Aggregation::None;
                }
                column.having = None;
            }
        }
        Ok(())
    }

    /// Setting a window clears any accumulator and its HAVING predicate.
    pub fn set_window(&mut self, key: &FieldKey, window: Option<WindowSpec>) -> Result<(), QueryError> {
        let column = self.column_mut(key)?;
        match window {
            Some(spec) => {
                column.aggregation = Aggregation::Window(spec);
                column.having = None;
            }
            None => {
                if column.window().is_some() {
                    column.aggregation = Aggregation::None;
                }
            }
        }
        Ok(())
    }

    /// Next sort sequence number: one past the highest in use.
    pub fn next_sort_order(&self) -> u64 {
        self.columns
            .iter()
            .filter_map(|c| c.sort.map(|s| s.sort_order))
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Set or clear the sort direction. A column that was not sorted goes to
    /// the end of the ORDER BY sequence; changing direction keeps its place.
    pub fn set_sort(&mut self, key: &FieldKey, direction: Option<SortDirection>) -> Result<(), QueryError> {
        let next = self.next_sort_order();
        let column = self.column_mut(key)?;
        let sort_order = column.sort.map_or(next, |s| s.sort_order);
        column.sort = direction.map(|direction| Sort { direction, sort_order });
        Ok(())
    }

    /// Cycle ASC → DESC → unsorted. Returns the new direction.
    pub fn toggle_sort(&mut self, key: &FieldKey) -> Result<Option<SortDirection>, QueryError> {
        let current = self
            .column(key)
            .ok_or_else(|| QueryError::UnknownColumn(key.clone()))?
            .sort
            .map(|s| s.direction);
        let next = match current {
            None => Some(SortDirection::Asc),
            Some(SortDirection::Asc) => Some(SortDirection::Desc),
            Some(SortDirection::Desc) => None,
        };
        self.set_sort(key, next)?;
        Ok(next)
    }

    /// Apply a pre-aggregation filter after validating its values against the
    /// field type declared in `schema`.
    pub fn set_filter(&mut self, key: &FieldKey, filter: Option<Predicate>, schema: &Schema) -> Result<(), QueryError> {
        if let Some(predicate) = &filter {
            let ty = schema.field_type(&key.entity, &key.field).unwrap_or_default();
            validate_predicate(ty, predicate).map_err(|source| QueryError::InvalidValue {
                key: key.clone(),
                source,
            })?;
        }
        self.column_mut(key)?.filter = filter;
        Ok(())
    }

    /// Apply a post-aggregation filter. Rejected unless the column carries an
    /// accumulator.
    pub fn set_having(&mut self, key: &FieldKey, having: Option<Predicate>, schema: &Schema) -> Result<(), QueryError> {
        let column = self.column_mut(key)?;
        if let Some(predicate) = &having {
            let accumulator = column
                .accumulator()
                .ok_or_else(|| QueryError::HavingWithoutAccumulator(key.clone()))?;
            let ty = having_type(accumulator, schema.field_type(&key.entity, &key.field));
            validate_predicate(ty, predicate).map_err(|source| QueryError::InvalidValue {
                key: key.clone(),
                source,
            })?;
        }
        column.having = having;
        Ok(())
    }

    pub fn set_alias(&mut self, key: &FieldKey, alias: Option<String>) -> Result<(), QueryError> {
        self.column_mut(key)?.alias = alias.filter(|a| !a.trim().is_empty());
        Ok(())
    }

    pub fn set_expression(&mut self, key: &FieldKey, expression: Option<String>) -> Result<(), QueryError> {
        self.column_mut(key)?.expression = expression.filter(|e| !e.trim().is_empty());
        Ok(())
    }

    pub fn selected(&self) -> impl Iterator<Item = &ColumnRef> {
        self.columns.iter().filter(|c| c.selected)
    }

    /// Any selected column carries an accumulator.
    pub fn has_accumulator(&self) -> bool {
        self.selected().any(|c| c.accumulator().is_some())
    }

    /// Whether the statement aggregates at all.
    pub fn needs_grouping(&self) -> bool {
        self.has_accumulator() || self.options.group_by_all
    }

    /// Implicit grouping keys: once anything aggregates, every selected column
    /// without an accumulator, window or expression.
    pub fn group_keys(&self) -> Vec<&ColumnRef> {
        if !self.needs_grouping() {
            return Vec::new();
        }
        self.selected().filter(|c| c.is_group_candidate()).collect()
    }

    /// Sorted columns in ORDER BY sequence. Ties keep column order.
    pub fn sorted_columns(&self) -> Vec<(&ColumnRef, Sort)> {
        let mut sorted: Vec<_> = self
            .columns
            .iter()
            .filter_map(|c| c.sort.map(|s| (c, s)))
            .collect();
        sorted.sort_by_key(|(_, s)| s.sort_order);
        sorted
    }

    /// Entities the statement touches, in first-selection order.
    pub fn referenced_entities(&self) -> Vec<&str> {
        let window_keys = self.selected().filter_map(ColumnRef::window).flat_map(|w| {
            w.partition_by
                .iter()
                .chain(w.order_by.iter().map(|o| &o.key))
        });

        let mut entities: Vec<&str> = Vec::new();
        for key in self.columns.iter().map(|c| &c.key).chain(window_keys) {
            if !entities.contains(&key.entity.as_str()) {
                entities.push(&key.entity);
            }
        }
        entities
    }

    /// Nothing to project and nothing to filter.
    pub fn is_empty(&self) -> bool {
        self.selected().next().is_none()
            && self.columns.iter().all(|c| c.filter.is_none())
            && self.options.custom_where().is_none()
    }
}

/// Value type a HAVING predicate compares against.
pub fn having_type(accumulator: Accumulator, field_type: Option<SemanticType>) -> SemanticType {
    if accumulator.is_numeric_result() {
        SemanticType::Number
    } else {
        field_type.unwrap_or_default()
    }
}
