//! Query model to aggregation pipeline stages.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use super::operators::{merge, translate};
use crate::ast::Schema;
use crate::graph::{Join, JoinGraph};
use crate::query::{
    having_type, Accumulator, Aggregation, ColumnRef, CustomStageKind, FieldKey, JoinType, LookupType, Query,
    SetOperator, SortDirection, StagePosition, WindowFunction, WindowSpec,
};

/// Stages for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Collection the pipeline runs on: the root entity.
    pub collection: String,
    pub stages: Vec<Value>,
}

/// Build the pipeline for `query`, or `None` when there is nothing to select
/// from.
pub fn build(query: &Query, schema: &Schema) -> Option<Pipeline> {
    Builder {
        schema,
        graph: JoinGraph::from_schema(schema),
    }
    .pipeline(query)
}

/// Bare stage array; empty when there is nothing to select from.
pub fn stages(query: &Query, schema: &Schema) -> Vec<Value> {
    build(query, schema).map(|p| p.stages).unwrap_or_default()
}

/// Path of a field relative to documents of `root`. Joined entities live
/// under their `$lookup` alias.
pub fn field_path(root: &str, key: &FieldKey) -> String {
    if key.entity == root {
        key.field.clone()
    } else {
        format!("{}.{}", key.entity, key.field)
    }
}

/// A raw expression: JSON when it parses, else a string (usually a `$path`).
fn expression_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.trim().to_string()))
}

fn direction(direction: SortDirection) -> i32 {
    match direction {
        SortDirection::Asc => 1,
        SortDirection::Desc => -1,
    }
}

/// Output field names, unique across the result document.
#[derive(Debug, Default)]
struct Names {
    taken: HashSet<String>,
}

impl Names {
    fn new() -> Self {
        let mut names = Self::default();
        names.taken.insert("_id".to_string());
        names
    }

    fn claim(&mut self, wanted: &str) -> String {
        if self.taken.insert(wanted.to_string()) {
            return wanted.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{wanted}_{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// The field name, else `entity_field`, else a numbered name.
    fn claim_key(&mut self, key: &FieldKey) -> String {
        if !self.taken.contains(&key.field) {
            return self.claim(&key.field);
        }
        self.claim(&format!("{}_{}", key.entity, key.field))
    }
}

#[derive(Debug)]
enum OutputKind<'q> {
    /// Part of the `$group` key.
    GroupKey,
    Accumulator(Accumulator),
    Window(&'q WindowSpec),
    Expression(&'q str),
    /// A plain field in an ungrouped pipeline.
    Field,
}

/// How a selected column appears in the result.
#[derive(Debug)]
struct Output<'q> {
    column: &'q ColumnRef,
    kind: OutputKind<'q>,
    /// Output field name; for a plain field, its path.
    name: String,
    /// Key in the final `$project`.
    shown: String,
}

struct Builder<'a> {
    schema: &'a Schema,
    graph: JoinGraph,
}

impl Builder<'_> {
    fn pipeline(&self, query: &Query) -> Option<Pipeline> {
        if query.is_empty() {
            return None;
        }
        let plan = self.graph.resolve(&query.referenced_entities());
        let root = plan.root.clone()?;
        let options = &query.options;
        let grouped = query.has_accumulator() || options.distinct || options.group_by_all;
        let outputs = outputs(query, &root, grouped);
        let single_key = outputs.iter().filter(|o| matches!(o.kind, OutputKind::GroupKey)).count() == 1;

        let mut stages = Vec::new();
        let custom = |stages: &mut Vec<Value>, position: StagePosition| {
            stages.extend(options.custom_stages_at(position).map(custom_stage));
        };

        custom(&mut stages, StagePosition::Start);

        if options.join_type == JoinType::Right && !plan.joins.is_empty() {
            log::warn!("RIGHT join has no $lookup equivalent; joining as INNER");
        }
        for join in &plan.joins {
            stages.extend(lookup(join, &root, options.join_type, options.lookup_type));
        }
        custom(&mut stages, StagePosition::AfterLookup);

        let pre_match = self.pre_match(query, &root);
        if !pre_match.is_empty() {
            stages.push(json!({ "$match": pre_match }));
        }
        custom(&mut stages, StagePosition::AfterMatch);

        for output in &outputs {
            if let OutputKind::Window(spec) = output.kind {
                stages.push(window_stage(&root, spec, operand(&root, output.column), &output.name));
            }
        }

        if grouped {
            stages.push(json!({ "$group": group_body(&outputs, &root) }));

            let sizes: Map<String, Value> = outputs
                .iter()
                .filter(|o| matches!(o.kind, OutputKind::Accumulator(Accumulator::CountDistinct)))
                .map(|o| (o.name.clone(), json!({ "$size": format!("${}", o.name) })))
                .collect();
            if !sizes.is_empty() {
                stages.push(json!({ "$addFields": sizes }));
            }
        }
        custom(&mut stages, StagePosition::AfterGroup);

        let post_match = self.post_match(query, &outputs, grouped);
        if !post_match.is_empty() {
            stages.push(json!({ "$match": post_match }));
        }

        custom(&mut stages, StagePosition::BeforeSort);
        let sort = sort_body(query, &outputs, &root, grouped, single_key);
        if !sort.is_empty() {
            stages.push(json!({ "$sort": sort }));
        }

        if let Some(skip) = options.offset {
            stages.push(json!({ "$skip": skip }));
        }
        if let Some(limit) = options.limit {
            stages.push(json!({ "$limit": limit }));
        }

        custom(&mut stages, StagePosition::BeforeProject);
        let reshaped = query.selected().any(|c| c.alias().is_some() || c.expression().is_some());
        if !grouped || reshaped {
            let project = project_body(&outputs, grouped, single_key);
            if project.len() > 1 {
                stages.push(json!({ "$project": project }));
            }
        }
        custom(&mut stages, StagePosition::End);

        for set_op in &options.set_operations {
            match set_op.kind {
                SetOperator::Union => {
                    if !set_op.all {
                        log::warn!("$unionWith keeps duplicates; UNION is emitted as UNION ALL");
                    }
                    match self.pipeline(&set_op.query) {
                        Some(nested) => stages.push(json!({
                            "$unionWith": { "coll": nested.collection, "pipeline": nested.stages }
                        })),
                        None => log::debug!("skipping UNION with an empty query"),
                    }
                }
                kind => log::warn!("{kind} has no aggregation stage; skipped"),
            }
        }

        Some(Pipeline {
            collection: root,
            stages,
        })
    }

    fn pre_match(&self, query: &Query, root: &str) -> Map<String, Value> {
        let mut clauses: Vec<Map<String, Value>> = query
            .columns
            .iter()
            .filter_map(|column| {
                let filter = column.filter.as_ref()?;
                let ty = self.schema.field_type(&column.key.entity, &column.key.field);
                translate(&field_path(root, &column.key), filter, ty)
            })
            .collect();

        if let Some(raw) = query.options.custom_where() {
            match serde_json::from_str::<Map<String, Value>>(raw) {
                Ok(doc) => clauses.push(doc),
                Err(err) => log::warn!("ignoring custom match `{raw}`: not a JSON object ({err})"),
            }
        }
        merge(clauses)
    }

    fn post_match(&self, query: &Query, outputs: &[Output<'_>], grouped: bool) -> Map<String, Value> {
        let clauses = query
            .columns
            .iter()
            .filter_map(|column| {
                let Some(having) = column.effective_having() else {
                    if column.having.is_some() {
                        log::debug!("dropping HAVING on {}: no accumulator", column.key);
                    }
                    return None;
                };
                let output = outputs.iter().find(|o| o.column.key == column.key);
                let (Some(output), true) = (output, grouped) else {
                    log::debug!("dropping HAVING on {}: not part of the $group", column.key);
                    return None;
                };
                let acc = column.accumulator()?;
                let ty = having_type(acc, self.schema.field_type(&column.key.entity, &column.key.field));
                translate(&output.name, having, Some(ty))
            })
            .collect();
        merge(clauses)
    }
}

/// Classify and name every selected column, in column order.
fn outputs<'q>(query: &'q Query, root: &str, grouped: bool) -> Vec<Output<'q>> {
    let mut names = Names::new();
    query
        .selected()
        .map(|column| {
            let kind = match (&column.aggregation, column.expression()) {
                (Aggregation::Accumulator(acc), _) => OutputKind::Accumulator(*acc),
                (Aggregation::Window(spec), _) => OutputKind::Window(spec),
                (Aggregation::None, Some(expr)) => OutputKind::Expression(expr),
                (Aggregation::None, None) if grouped => OutputKind::GroupKey,
                (Aggregation::None, None) => OutputKind::Field,
            };

            let name = match (&kind, column.alias()) {
                (OutputKind::Field, _) => field_path(root, &column.key),
                (OutputKind::GroupKey, _) => names.claim_key(&column.key),
                (_, Some(alias)) => names.claim(alias.trim()),
                (OutputKind::Accumulator(Accumulator::Count), None) => names.claim("count"),
                (OutputKind::Accumulator(acc), None) => {
                    names.claim(&format!("{}_{}", acc.name_stem(), column.key.field))
                }
                (OutputKind::Window(spec), None) => {
                    names.claim(&format!("{}_{}", spec.function.name_stem(), column.key.field))
                }
                (OutputKind::Expression(_), None) => names.claim_key(&column.key),
            };

            let alias = column.alias().map(str::trim);
            let shown = match (&kind, alias) {
                (OutputKind::Field, Some(alias)) => names.claim(alias),
                (OutputKind::Field, None) => names.claim(&name),
                (OutputKind::GroupKey, Some(alias)) if alias != name => names.claim(alias),
                _ => name.clone(),
            };

            Output {
                column,
                kind,
                name,
                shown,
            }
        })
        .collect()
}

/// The value a column's aggregate or window is computed over.
fn operand(root: &str, column: &ColumnRef) -> Value {
    match column.expression() {
        Some(expr) => expression_value(expr),
        None => Value::String(format!("${}", field_path(root, &column.key))),
    }
}

fn lookup(join: &Join, root: &str, join_type: JoinType, lookup_type: LookupType) -> Vec<Value> {
    let (entity, stage) = match join {
        Join::On(step) => (
            &step.to_entity,
            json!({
                "$lookup": {
                    "from": step.to_entity,
                    "localField": field_path(root, &FieldKey::new(&step.from_entity, &step.from_field)),
                    "foreignField": step.to_field,
                    "as": step.to_entity,
                }
            }),
        ),
        Join::Cross { entity } => (
            entity,
            json!({ "$lookup": { "from": entity, "pipeline": [], "as": entity } }),
        ),
    };

    if lookup_type == LookupType::Array {
        return vec![stage];
    }
    let unwind = if matches!(join_type, JoinType::Left | JoinType::Full) {
        json!({ "$unwind": { "path": format!("${entity}"), "preserveNullAndEmptyArrays": true } })
    } else {
        json!({ "$unwind": format!("${entity}") })
    };
    vec![stage, unwind]
}

fn accumulator(acc: Accumulator, operand: Value) -> Value {
    match acc {
        Accumulator::Count => json!({ "$sum": 1 }),
        Accumulator::CountDistinct | Accumulator::AddToSet => json!({ "$addToSet": operand }),
        Accumulator::Sum => json!({ "$sum": operand }),
        Accumulator::Avg => json!({ "$avg": operand }),
        Accumulator::Min => json!({ "$min": operand }),
        Accumulator::Max => json!({ "$max": operand }),
        Accumulator::StdDevPop => json!({ "$stdDevPop": operand }),
        Accumulator::StdDevSamp => json!({ "$stdDevSamp": operand }),
        Accumulator::Push => json!({ "$push": operand }),
        Accumulator::First => json!({ "$first": operand }),
        Accumulator::Last => json!({ "$last": operand }),
    }
}

fn group_body(outputs: &[Output<'_>], root: &str) -> Map<String, Value> {
    let keys: Vec<&Output<'_>> = outputs
        .iter()
        .filter(|o| matches!(o.kind, OutputKind::GroupKey))
        .collect();
    let id = match keys.as_slice() {
        [] => Value::Null,
        [key] => Value::String(format!("${}", field_path(root, &key.column.key))),
        keys => Value::Object(
            keys.iter()
                .map(|k| (k.name.clone(), Value::String(format!("${}", field_path(root, &k.column.key)))))
                .collect(),
        ),
    };

    let mut body = Map::new();
    body.insert("_id".to_string(), id);
    for output in outputs {
        let value = match output.kind {
            OutputKind::Accumulator(acc) => accumulator(acc, operand(root, output.column)),
            // Computed before the group; carried through.
            OutputKind::Window(_) => json!({ "$first": format!("${}", output.name) }),
            OutputKind::Expression(expr) => json!({ "$first": expression_value(expr) }),
            OutputKind::GroupKey | OutputKind::Field => continue,
        };
        body.insert(output.name.clone(), value);
    }
    body
}

fn window_stage(root: &str, spec: &WindowSpec, operand: Value, name: &str) -> Value {
    let mut body = Map::new();

    match spec.partition_by.as_slice() {
        [] => {}
        [key] => {
            body.insert("partitionBy".into(), Value::String(format!("${}", field_path(root, key))));
        }
        keys => {
            let doc: Map<String, Value> = keys
                .iter()
                .map(|k| (field_path(root, k).replace('.', "_"), Value::String(format!("${}", field_path(root, k)))))
                .collect();
            body.insert("partitionBy".into(), Value::Object(doc));
        }
    }

    let sorted = !spec.order_by.is_empty();
    if sorted {
        let sort_by: Map<String, Value> = spec
            .order_by
            .iter()
            .map(|o| (field_path(root, &o.key), json!(direction(o.direction))))
            .collect();
        body.insert("sortBy".into(), Value::Object(sort_by));
    }

    let by = spec.offset.unwrap_or(1);
    let (mut output, ordered_only) = match spec.function {
        WindowFunction::RowNumber => (json!({ "$documentNumber": {} }), true),
        WindowFunction::Rank => (json!({ "$rank": {} }), true),
        WindowFunction::DenseRank => (json!({ "$denseRank": {} }), true),
        WindowFunction::Lag => (json!({ "$shift": { "output": operand, "by": -by, "default": null } }), true),
        WindowFunction::Lead => (json!({ "$shift": { "output": operand, "by": by, "default": null } }), true),
        WindowFunction::FirstValue => (json!({ "$first": operand }), false),
        WindowFunction::LastValue => (json!({ "$last": operand }), false),
        WindowFunction::Sum => (json!({ "$sum": operand }), false),
        WindowFunction::Avg => (json!({ "$avg": operand }), false),
        WindowFunction::Count => (json!({ "$count": {} }), false),
        WindowFunction::Min => (json!({ "$min": operand }), false),
        WindowFunction::Max => (json!({ "$max": operand }), false),
    };

    if ordered_only && !sorted {
        log::warn!("{} needs an ORDER BY key; $setWindowFields will reject it", spec.function);
    }
    // Running frame, matching SQL's default frame under ORDER BY.
    if !ordered_only && sorted {
        if let Some(doc) = output.as_object_mut() {
            doc.insert("window".into(), json!({ "documents": ["unbounded", "current"] }));
        }
    }

    let mut outputs = Map::new();
    outputs.insert(name.to_string(), output);
    body.insert("output".into(), Value::Object(outputs));
    json!({ "$setWindowFields": body })
}

fn sort_body(
    query: &Query,
    outputs: &[Output<'_>],
    root: &str,
    grouped: bool,
    single_key: bool,
) -> Map<String, Value> {
    query
        .sorted_columns()
        .into_iter()
        .filter_map(|(column, sort)| {
            let path = match outputs.iter().find(|o| o.column.key == column.key) {
                Some(o) => match o.kind {
                    OutputKind::GroupKey if single_key => "_id".to_string(),
                    OutputKind::GroupKey => format!("_id.{}", o.name),
                    OutputKind::Accumulator(_) | OutputKind::Window(_) => o.name.clone(),
                    OutputKind::Expression(_) if grouped => o.name.clone(),
                    // Expressions are only computed by the final $project.
                    OutputKind::Expression(_) | OutputKind::Field => field_path(root, &column.key),
                },
                None if !grouped => field_path(root, &column.key),
                None => {
                    log::debug!("cannot sort on {} after $group; skipped", column.key);
                    return None;
                }
            };
            Some((path, json!(direction(sort.direction))))
        })
        .collect()
}

fn project_body(outputs: &[Output<'_>], grouped: bool, single_key: bool) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("_id".to_string(), json!(0));
    for output in outputs {
        let value = match output.kind {
            OutputKind::GroupKey if single_key => json!("$_id"),
            OutputKind::GroupKey => Value::String(format!("$_id.{}", output.name)),
            OutputKind::Field if output.shown == output.name => json!(1),
            OutputKind::Field => Value::String(format!("${}", output.name)),
            OutputKind::Expression(expr) if !grouped => expression_value(expr),
            OutputKind::Accumulator(_) | OutputKind::Window(_) | OutputKind::Expression(_) => json!(1),
        };
        body.insert(output.shown.clone(), value);
    }
    body
}

fn custom_stage(stage: &CustomStageKind) -> Value {
    let dollar = |path: &str| {
        if path.starts_with('$') {
            path.to_string()
        } else {
            format!("${path}")
        }
    };

    match stage {
        CustomStageKind::Unwind {
            path,
            preserve_null_and_empty_arrays: true,
        } => json!({ "$unwind": { "path": dollar(path), "preserveNullAndEmptyArrays": true } }),
        CustomStageKind::Unwind { path, .. } => json!({ "$unwind": dollar(path) }),
        CustomStageKind::AddFields { fields } => json!({ "$addFields": fields }),
        CustomStageKind::Set { fields } => json!({ "$set": fields }),
        CustomStageKind::Group { spec } => json!({ "$group": spec }),
        CustomStageKind::Sort { keys } => {
            let body: Map<String, Value> = keys
                .iter()
                .map(|k| (k.path.trim_start_matches('$').to_string(), json!(direction(k.direction))))
                .collect();
            json!({ "$sort": body })
        }
        CustomStageKind::Computed { field, operator, args } => {
            let args: Vec<Value> = args.iter().map(|a| expression_value(a)).collect();
            let mut expr = Map::new();
            expr.insert(dollar(operator), Value::Array(args));
            json!({ "$addFields": { field: expr } })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse_schema;
    use crate::query::{CustomStage, Operator, Predicate, QueryOptions, SetOperation, SortKey};

    fn schema() -> Schema {
        parse_schema(
            "employees {\n  id int pk\n  name string\n  salary decimal\n  hired date\n  department_id int\n}\n\
             departments {\n  id int pk\n  name string\n}\n\
             offices {\n  id int pk\n  city string\n}\n\
             employees.department_id > departments.id",
        )
    }

    fn pipeline(query: &Query) -> Value {
        Value::Array(stages(query, &schema()))
    }

    #[test]
    fn test_empty_query_has_no_stages() {
        assert!(stages(&Query::new(), &schema()).is_empty());
    }

    #[test]
    fn test_plain_projection() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "name"))
            .with_column(ColumnRef::new("departments", "name").with_alias("department"));
        assert_eq!(
            pipeline(&query),
            json!([
                {"$lookup": {"from": "departments", "localField": "department_id", "foreignField": "id", "as": "departments"}},
                {"$unwind": "$departments"},
                {"$project": {"_id": 0, "name": 1, "department": "$departments.name"}},
            ])
        );
    }

    #[test]
    fn test_array_lookup_and_left_join() {
        let mut query = Query::new()
            .with_column(ColumnRef::new("departments", "name"))
            .with_column(ColumnRef::new("employees", "name"));
        query.options.join_type = JoinType::Left;
        let stages = stages(&query, &schema());
        assert_eq!(
            stages[0],
            json!({"$lookup": {"from": "employees", "localField": "id", "foreignField": "department_id", "as": "employees"}})
        );
        assert_eq!(stages[1], json!({"$unwind": {"path": "$employees", "preserveNullAndEmptyArrays": true}}));

        query.options.lookup_type = LookupType::Array;
        assert!(super::stages(&query, &schema()).iter().all(|s| s.get("$unwind").is_none()));
    }

    #[test]
    fn test_disconnected_entity_uses_uncorrelated_lookup() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "name"))
            .with_column(ColumnRef::new("offices", "city"));
        assert_eq!(
            stages(&query, &schema())[0],
            json!({"$lookup": {"from": "offices", "pipeline": [], "as": "offices"}})
        );
    }

    #[test]
    fn test_single_group_key_and_named_accumulators() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "department_id"))
            .with_column(ColumnRef::new("employees", "salary").with_accumulator(Accumulator::Avg))
            .with_column(ColumnRef::new("employees", "hired").with_accumulator(Accumulator::Max))
            .with_column(ColumnRef::new("employees", "id").with_accumulator(Accumulator::CountDistinct))
            .with_column(ColumnRef::new("employees", "name").with_accumulator(Accumulator::Count).with_sort(SortDirection::Desc, 1));
        assert_eq!(
            pipeline(&query),
            json!([
                {"$group": {
                    "_id": "$department_id",
                    "avg_salary": {"$avg": "$salary"},
                    "max_hired": {"$max": "$hired"},
                    "count_distinct_id": {"$addToSet": "$id"},
                    "count": {"$sum": 1},
                }},
                {"$addFields": {"count_distinct_id": {"$size": "$count_distinct_id"}}},
                {"$sort": {"count": -1}},
            ])
        );
    }

    #[test]
    fn test_filters_merge_into_one_match() {
        let mut query = Query::new()
            .with_column(ColumnRef::new("employees", "name").with_filter(Predicate::new(Operator::Like, "A%")))
            .with_column(ColumnRef::new("employees", "hired").unselected().with_filter(Predicate::new(Operator::Gte, "2020-01-01")));
        query.options.custom_where = Some(r#"{"active": true}"#.into());
        query.options.limit = Some(5);
        query.options.offset = Some(10);
        assert_eq!(
            pipeline(&query),
            json!([
                {"$match": {
                    "name": {"$regex": "^A.*$"},
                    "hired": {"$gte": {"$date": "2020-01-01T00:00:00.000Z"}},
                    "active": true,
                }},
                {"$skip": 10},
                {"$limit": 5},
                {"$project": {"_id": 0, "name": 1}},
            ])
        );
    }

    #[test]
    fn test_invalid_custom_match_is_skipped() {
        let mut query = Query::new().with_column(ColumnRef::new("employees", "name"));
        query.options.custom_where = Some("name = 'x'".into());
        assert_eq!(pipeline(&query), json!([{"$project": {"_id": 0, "name": 1}}]));
    }

    #[test]
    fn test_window_fields_are_carried_through_group() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "department_id"))
            .with_column(ColumnRef::new("employees", "salary").with_window(
                WindowSpec::new(WindowFunction::Sum).order_by(FieldKey::new("employees", "hired"), SortDirection::Asc),
            ))
            .with_column(ColumnRef::new("employees", "id").with_accumulator(Accumulator::Count));
        assert_eq!(
            pipeline(&query),
            json!([
                {"$setWindowFields": {
                    "sortBy": {"hired": 1},
                    "output": {"sum_salary": {"$sum": "$salary", "window": {"documents": ["unbounded", "current"]}}},
                }},
                {"$group": {
                    "_id": "$department_id",
                    "sum_salary": {"$first": "$sum_salary"},
                    "count": {"$sum": 1},
                }},
            ])
        );
    }

    #[test]
    fn test_rank_window_with_partition() {
        let query = Query::new().with_column(ColumnRef::new("employees", "salary").with_alias("pos").with_window(
            WindowSpec::new(WindowFunction::DenseRank)
                .partition_by(FieldKey::new("departments", "name"))
                .order_by(FieldKey::new("employees", "salary"), SortDirection::Desc),
        ));
        let stages = stages(&query, &schema());
        assert_eq!(
            stages[2],
            json!({"$setWindowFields": {
                "partitionBy": "$departments.name",
                "sortBy": {"salary": -1},
                "output": {"pos": {"$denseRank": {}}},
            }})
        );
        assert_eq!(stages[3], json!({"$project": {"_id": 0, "pos": 1}}));
    }

    #[test]
    fn test_aliased_group_keys_are_projected() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "name").with_alias("employee"))
            .with_column(ColumnRef::new("departments", "name"))
            .with_column(ColumnRef::new("employees", "salary").with_accumulator(Accumulator::Sum).with_alias("total"));
        let stages = stages(&query, &schema());
        assert_eq!(
            stages[2],
            json!({"$group": {
                "_id": {"name": "$name", "departments_name": "$departments.name"},
                "total": {"$sum": "$salary"},
            }})
        );
        assert_eq!(
            stages[3],
            json!({"$project": {"_id": 0, "employee": "$_id.name", "departments_name": "$_id.departments_name", "total": 1}})
        );
    }

    #[test]
    fn test_alias_does_not_shadow_another_column() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "name"))
            .with_column(ColumnRef::new("employees", "id").with_alias("name"));
        assert_eq!(pipeline(&query), json!([{"$project": {"_id": 0, "name": 1, "name_2": "$id"}}]));
    }

    #[test]
    fn test_group_key_alias_does_not_shadow_accumulator() {
        let query = Query::new()
            .with_column(ColumnRef::new("employees", "salary").with_accumulator(Accumulator::Sum).with_alias("total"))
            .with_column(ColumnRef::new("employees", "name").with_alias("total"));
        let stages = stages(&query, &schema());
        assert_eq!(
            stages[1],
            json!({"$project": {"_id": 0, "total": 1, "total_2": "$_id"}})
        );
    }

    #[test]
    fn test_distinct_groups_without_accumulators() {
        let mut query = Query::new()
            .with_column(ColumnRef::new("employees", "name"))
            .with_column(ColumnRef::new("employees", "department_id"));
        query.options.distinct = true;
        assert_eq!(
            pipeline(&query),
            json!([{"$group": {"_id": {"name": "$name", "department_id": "$department_id"}}}])
        );
    }

    #[test]
    fn test_custom_stages_land_at_their_positions() {
        let mut query = Query::new()
            .with_column(ColumnRef::new("employees", "name"))
            .with_column(ColumnRef::new("employees", "id").with_accumulator(Accumulator::Count));
        let stage = |position, stage| CustomStage { position, stage };
        query.options.custom_stages = vec![
            stage(StagePosition::End, CustomStageKind::Set { fields: Map::new() }),
            stage(StagePosition::Start, CustomStageKind::Unwind { path: "tags".into(), preserve_null_and_empty_arrays: false }),
            stage(
                StagePosition::AfterGroup,
                CustomStageKind::Computed { field: "double".into(), operator: "multiply".into(), args: vec!["$count".into(), "2".into()] },
            ),
            stage(
                StagePosition::BeforeSort,
                CustomStageKind::Sort { keys: vec![SortKey { path: "$count".into(), direction: SortDirection::Desc }] },
            ),
        ];
        assert_eq!(
            pipeline(&query),
            json!([
                {"$unwind": "$tags"},
                {"$group": {"_id": "$name", "count": {"$sum": 1}}},
                {"$addFields": {"double": {"$multiply": ["$count", 2]}}},
                {"$sort": {"count": -1}},
                {"$set": {}},
            ])
        );
    }

    #[test]
    fn test_union_with_nested_pipeline() {
        let nested = Query::new().with_column(ColumnRef::new("offices", "city").with_alias("name"));
        let mut query = Query::new().with_column(ColumnRef::new("departments", "name"));
        query.options = QueryOptions {
            set_operations: vec![
                SetOperation { kind: SetOperator::Union, all: true, query: Box::new(nested) },
                SetOperation { kind: SetOperator::Except, all: false, query: Box::new(Query::new()) },
            ],
            ..QueryOptions::default()
        };
        assert_eq!(
            pipeline(&query),
            json!([
                {"$project": {"_id": 0, "name": 1}},
                {"$unionWith": {"coll": "offices", "pipeline": [{"$project": {"_id": 0, "name": "$city"}}]}},
            ])
        );
    }

    #[test]
    fn test_expression_projection() {
        let query = Query::new().with_column(
            ColumnRef::new("employees", "name").with_alias("upper").with_expression(r#"{"$toUpper": "$name"}"#),
        );
        assert_eq!(pipeline(&query), json!([{"$project": {"_id": 0, "upper": {"$toUpper": "$name"}}}]));
    }
}
