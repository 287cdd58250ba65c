//! Query model to SQL statement text.

use serde::{Deserialize, Serialize};

use super::expr::{self, column_ref};
use super::Dialect;
use crate::ast::Schema;
use crate::graph::{Join, JoinGraph};
use crate::query::{having_type, Aggregation, ColumnRef, JoinType, Query, SetOperator};

/// Shown in place of a statement when nothing is selected.
pub const PLACEHOLDER: &str = "-- Select fields to build a query";

/// MySQL's "no limit" value, used when only OFFSET is set.
const MYSQL_MAX_LIMIT: u64 = u64::MAX;

/// SQL generation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub dialect: Dialect,
    /// One clause per line.
    pub pretty: bool,
}

impl Options {
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

/// Compile `query` against `schema` into a single SQL statement.
///
/// Always returns text: the placeholder comment when there is nothing to
/// select from.
pub fn generate(query: &Query, schema: &Schema, options: &Options) -> String {
    let generator = Generator {
        schema,
        graph: JoinGraph::from_schema(schema),
        dialect: options.dialect,
    };

    match generator.statement(query) {
        Some(clauses) => {
            let separator = if options.pretty { "\n" } else { " " };
            clauses.join(separator)
        }
        None => PLACEHOLDER.to_string(),
    }
}

struct Generator<'a> {
    schema: &'a Schema,
    graph: JoinGraph,
    dialect: Dialect,
}

impl Generator<'_> {
    /// Clauses of one statement plus its set operations, or `None` when the
    /// query has nothing to select from.
    fn statement(&self, query: &Query) -> Option<Vec<String>> {
        if query.is_empty() {
            return None;
        }
        let plan = self.graph.resolve(&query.referenced_entities());
        let root = plan.root.as_deref()?;

        let mut clauses = vec![self.select(query), format!("FROM {}", self.dialect.quote_ident(root))];
        clauses.extend(plan.joins.iter().map(|join| self.join(join, query.options.join_type)));

        let filters = self.filters(query);
        if !filters.is_empty() {
            clauses.push(format!("WHERE {}", filters.join(" AND ")));
        }

        if query.options.group_by_all {
            clauses.push("GROUP BY ALL".to_string());
        } else {
            let keys: Vec<String> = query
                .group_keys()
                .into_iter()
                .map(|c| column_ref(&c.key, self.dialect))
                .collect();
            if !keys.is_empty() {
                clauses.push(format!("GROUP BY {}", keys.join(", ")));
            }
        }

        let having = self.having(query);
        if !having.is_empty() {
            clauses.push(format!("HAVING {}", having.join(" AND ")));
        }

        let sorted = query.sorted_columns();
        if !sorted.is_empty() {
            let grouped = query.needs_grouping();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(column, sort)| {
                    format!("{} {}", self.sort_target(column, grouped), expr::direction(sort.direction))
                })
                .collect();
            clauses.push(format!("ORDER BY {}", items.join(", ")));
        }

        clauses.extend(self.limit_offset(query));

        for set_op in &query.options.set_operations {
            let Some(nested) = self.statement(&set_op.query) else {
                log::debug!("skipping {} with an empty query", set_op.kind);
                continue;
            };
            let keyword = match (set_op.kind, set_op.all) {
                (SetOperator::Union, true) => "UNION ALL",
                (SetOperator::Union, false) => "UNION",
                (SetOperator::Intersect, true) => "INTERSECT ALL",
                (SetOperator::Intersect, false) => "INTERSECT",
                (SetOperator::Except, true) => "EXCEPT ALL",
                (SetOperator::Except, false) => "EXCEPT",
            };
            clauses.push(keyword.to_string());
            clauses.extend(nested);
        }

        Some(clauses)
    }

    fn select(&self, query: &Query) -> String {
        let keyword = if query.options.distinct { "SELECT DISTINCT" } else { "SELECT" };

        let items: Vec<String> = query
            .selected()
            .map(|column| {
                let item = self.projection(column);
                match column.alias() {
                    Some(alias) => format!("{item} AS {}", self.dialect.quote_ident(alias.trim())),
                    None => item,
                }
            })
            .collect();

        if items.is_empty() {
            format!("{keyword} *")
        } else {
            format!("{keyword} {}", items.join(", "))
        }
    }

    /// The projected expression of a column, without its alias.
    fn projection(&self, column: &ColumnRef) -> String {
        let operand = expr::operand(column, self.dialect);
        match &column.aggregation {
            Aggregation::None => operand,
            Aggregation::Accumulator(acc) => expr::aggregate(*acc, &operand, self.dialect),
            Aggregation::Window(spec) => expr::window(spec, &operand, self.dialect),
        }
    }

    fn join(&self, join: &Join, join_type: JoinType) -> String {
        match join {
            Join::On(step) => {
                if join_type == JoinType::Full && !self.dialect.supports_full_join() {
                    log::warn!("{} does not support FULL JOIN", self.dialect);
                }
                format!(
                    "{join_type} JOIN {} ON {}.{} = {}.{}",
                    self.dialect.quote_ident(&step.to_entity),
                    self.dialect.quote_ident(&step.from_entity),
                    self.dialect.quote_ident(&step.from_field),
                    self.dialect.quote_ident(&step.to_entity),
                    self.dialect.quote_ident(&step.to_field),
                )
            }
            Join::Cross { entity } => format!("CROSS JOIN {}", self.dialect.quote_ident(entity)),
        }
    }

    fn filters(&self, query: &Query) -> Vec<String> {
        let mut filters: Vec<String> = query
            .columns
            .iter()
            .filter_map(|column| {
                let filter = column.filter.as_ref()?;
                let ty = self.schema.field_type(&column.key.entity, &column.key.field);
                expr::predicate(&expr::operand(column, self.dialect), filter, ty)
            })
            .collect();

        if let Some(custom) = query.options.custom_where() {
            if filters.is_empty() {
                filters.push(custom.to_string());
            } else {
                filters.push(format!("({custom})"));
            }
        }
        filters
    }

    fn having(&self, query: &Query) -> Vec<String> {
        query
            .columns
            .iter()
            .filter_map(|column| {
                let Some(predicate) = column.effective_having() else {
                    if column.having.is_some() {
                        log::debug!("dropping HAVING on {}: no accumulator", column.key);
                    }
                    return None;
                };
                if !(column.selected && query.needs_grouping()) {
                    log::debug!("dropping HAVING on {}: not part of the grouped projection", column.key);
                    return None;
                }
                let acc = column.accumulator()?;
                let lhs = expr::aggregate(acc, &expr::operand(column, self.dialect), self.dialect);
                let ty = having_type(acc, self.schema.field_type(&column.key.entity, &column.key.field));
                expr::predicate(&lhs, predicate, Some(ty))
            })
            .collect()
    }

    /// An unselected accumulator sorts by its operand unless the statement
    /// groups, so no aggregate lands in an ungrouped ORDER BY.
    fn sort_target(&self, column: &ColumnRef, grouped: bool) -> String {
        match column.alias() {
            Some(alias) if column.selected => self.dialect.quote_ident(alias.trim()),
            _ if !column.selected && !grouped => expr::operand(column, self.dialect),
            _ => self.projection(column),
        }
    }

    fn limit_offset(&self, query: &Query) -> Vec<String> {
        let mut clauses = Vec::new();
        match (query.options.limit, query.options.offset) {
            (Some(limit), _) => clauses.push(format!("LIMIT {limit}")),
            (None, Some(_)) if self.dialect.requires_limit_for_offset() => {
                clauses.push(format!("LIMIT {MYSQL_MAX_LIMIT}"))
            }
            (None, _) => {}
        }
        if let Some(offset) = query.options.offset {
            clauses.push(format!("OFFSET {offset}"));
        }
        clauses
    }
}
