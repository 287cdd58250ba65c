//! Filter operators as MongoDB query operators.

use serde_json::{json, Map, Number, Value};

use crate::query::{coerce_or_text, infer, Literal, Operator, Predicate};
use crate::types::SemanticType;

/// Operators that map onto a single MongoDB query operator.
pub const OPERATOR_TABLE: &[(Operator, &str)] = &[
    (Operator::Eq, "$eq"),
    (Operator::NotEq, "$ne"),
    (Operator::Gt, "$gt"),
    (Operator::Lt, "$lt"),
    (Operator::Gte, "$gte"),
    (Operator::Lte, "$lte"),
    (Operator::Like, "$regex"),
    (Operator::In, "$in"),
    (Operator::NotIn, "$nin"),
    (Operator::Exists, "$exists"),
];

pub fn mongo_operator(op: Operator) -> Option<&'static str> {
    OPERATOR_TABLE.iter().find(|(o, _)| *o == op).map(|(_, m)| *m)
}

pub fn sql_operator(mongo: &str) -> Option<Operator> {
    OPERATOR_TABLE.iter().find(|(_, m)| *m == mongo).map(|(o, _)| *o)
}

/// Extended JSON for a coerced literal.
pub fn literal(lit: Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(b),
        Literal::Int(i) => Value::from(i),
        Literal::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        Literal::Date { iso, .. } => json!({ "$date": iso }),
        Literal::Text(text) => Value::String(text),
        Literal::Json(value) => value,
    }
}

fn value(ty: Option<SemanticType>, raw: &str) -> Value {
    literal(match ty {
        Some(ty) => coerce_or_text(ty, raw),
        None => infer(raw),
    })
}

/// Anchored regular expression equivalent to a SQL `LIKE` pattern.
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }
    regex.push('$');
    regex
}

/// `{ path: { $op: value } }` (or a top-level `$or` for `NOT BETWEEN`),
/// `None` when the predicate is missing a value.
pub fn translate(path: &str, pred: &Predicate, ty: Option<SemanticType>) -> Option<Map<String, Value>> {
    if !pred.is_complete() {
        log::debug!("skipping incomplete `{}` predicate on {path}", pred.operator);
        return None;
    }

    let condition = match pred.operator {
        op @ (Operator::Eq | Operator::NotEq | Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte) => {
            let mongo = mongo_operator(op)?;
            json!({ mongo: value(ty, pred.value()) })
        }
        Operator::Like => json!({ "$regex": like_to_regex(pred.value()) }),
        Operator::NotLike => json!({ "$not": { "$regex": like_to_regex(pred.value()) } }),
        Operator::In | Operator::NotIn => {
            let items: Vec<Value> = pred.list_values().into_iter().map(|v| value(ty, v)).collect();
            let mongo = if pred.operator == Operator::In { "$in" } else { "$nin" };
            json!({ mongo: items })
        }
        Operator::Between => json!({
            "$gte": value(ty, pred.value()),
            "$lte": value(ty, pred.second_value().unwrap_or_default()),
        }),
        Operator::NotBetween => {
            let mut doc = Map::new();
            doc.insert(
                "$or".to_string(),
                json!([
                    { path: { "$lt": value(ty, pred.value()) } },
                    { path: { "$gt": value(ty, pred.second_value().unwrap_or_default()) } },
                ]),
            );
            return Some(doc);
        }
        Operator::IsNull => json!({ "$eq": null }),
        Operator::IsNotNull => json!({ "$ne": null }),
        Operator::Exists => json!({ "$exists": true }),
    };

    let mut doc = Map::new();
    doc.insert(path.to_string(), condition);
    Some(doc)
}

/// Combine clauses with implicit AND. Falls back to an explicit `$and` when
/// two clauses constrain the same key.
pub fn merge(clauses: Vec<Map<String, Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    let mut collision = false;
    for clause in &clauses {
        for (key, value) in clause {
            if merged.contains_key(key) {
                collision = true;
                break;
            }
            merged.insert(key.clone(), value.clone());
        }
    }

    if !collision {
        return merged;
    }
    let mut doc = Map::new();
    doc.insert(
        "$and".to_string(),
        Value::Array(clauses.into_iter().map(Value::Object).collect()),
    );
    doc
}
