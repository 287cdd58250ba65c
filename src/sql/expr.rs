//! Rendering of individual SQL expressions.

use super::Dialect;
use crate::query::{
    coerce_or_text, infer, Accumulator, ColumnRef, FieldKey, Literal, Operator, Predicate, SortDirection,
    WindowFunction, WindowSpec,
};
use crate::types::SemanticType;

/// `entity.field`, quoted where needed.
pub fn column_ref(key: &FieldKey, dialect: Dialect) -> String {
    format!("{}.{}", dialect.quote_ident(&key.entity), dialect.quote_ident(&key.field))
}

/// The column's expression if it has one, else its field reference.
pub fn operand(column: &ColumnRef, dialect: Dialect) -> String {
    match column.expression() {
        Some(expr) => expr.trim().to_string(),
        None => column_ref(&column.key, dialect),
    }
}

pub fn string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub fn literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Date { raw, .. } => string_literal(raw),
        Literal::Text(text) => string_literal(text),
        Literal::Json(value) => string_literal(&value.to_string()),
    }
}

/// Render a raw value for a field of type `ty`; `None` when the type is not
/// known, in which case the literal kind is inferred.
fn value(ty: Option<SemanticType>, raw: &str) -> String {
    let lit = match ty {
        Some(ty) => coerce_or_text(ty, raw),
        None => infer(raw),
    };
    literal(&lit)
}

/// `lhs <op> <values>`, or `None` when the predicate is missing a value.
pub fn predicate(lhs: &str, pred: &Predicate, ty: Option<SemanticType>) -> Option<String> {
    if !pred.is_complete() {
        log::debug!("skipping incomplete `{}` predicate on {lhs}", pred.operator);
        return None;
    }

    let op = pred.operator;
    let rendered = match op {
        Operator::Eq | Operator::NotEq | Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
            format!("{lhs} {op} {}", value(ty, pred.value()))
        }
        Operator::Like | Operator::NotLike => format!("{lhs} {op} {}", string_literal(pred.value())),
        Operator::In | Operator::NotIn => {
            let items: Vec<String> = pred.list_values().into_iter().map(|v| value(ty, v)).collect();
            format!("{lhs} {op} ({})", items.join(", "))
        }
        Operator::Between | Operator::NotBetween => format!(
            "{lhs} {op} {} AND {}",
            value(ty, pred.value()),
            value(ty, pred.second_value().unwrap_or_default()),
        ),
        Operator::IsNull | Operator::IsNotNull => format!("{lhs} {op}"),
        Operator::Exists => match pred.value() {
            "" => format!("{lhs} IS NOT NULL"),
            subquery => format!("EXISTS ({subquery})"),
        },
    };
    Some(rendered)
}

pub fn aggregate(acc: Accumulator, operand: &str, dialect: Dialect) -> String {
    match acc {
        Accumulator::Count => format!("COUNT({operand})"),
        Accumulator::CountDistinct => format!("COUNT(DISTINCT {operand})"),
        Accumulator::Sum => format!("SUM({operand})"),
        Accumulator::Avg => format!("AVG({operand})"),
        Accumulator::Min => format!("MIN({operand})"),
        Accumulator::Max => format!("MAX({operand})"),
        Accumulator::StdDevPop => format!("STDDEV_POP({operand})"),
        Accumulator::StdDevSamp => format!("STDDEV_SAMP({operand})"),
        Accumulator::Push => format!("{}({operand})", dialect.array_agg()),
        Accumulator::AddToSet => {
            if dialect == Dialect::MySQL {
                log::warn!("MySQL has no JSON_ARRAYAGG(DISTINCT ...); duplicates are kept");
                format!("{}({operand})", dialect.array_agg())
            } else {
                format!("{}(DISTINCT {operand})", dialect.array_agg())
            }
        }
        Accumulator::First | Accumulator::Last => {
            log::warn!("{acc} has no portable SQL aggregate; rendering ANY_VALUE({operand})");
            format!("ANY_VALUE({operand})")
        }
    }
}

/// `FUNC(args) OVER (PARTITION BY ... ORDER BY ...)`.
pub fn window(spec: &WindowSpec, operand: &str, dialect: Dialect) -> String {
    let args = if !spec.function.takes_argument() {
        String::new()
    } else {
        match spec.offset {
            Some(offset) if matches!(spec.function, WindowFunction::Lag | WindowFunction::Lead) => {
                format!("{operand}, {offset}")
            }
            _ => operand.to_string(),
        }
    };

    let mut over = Vec::new();
    if !spec.partition_by.is_empty() {
        let keys: Vec<String> = spec.partition_by.iter().map(|k| column_ref(k, dialect)).collect();
        over.push(format!("PARTITION BY {}", keys.join(", ")));
    }
    if !spec.order_by.is_empty() {
        let keys: Vec<String> = spec
            .order_by
            .iter()
            .map(|o| format!("{} {}", column_ref(&o.key, dialect), direction(o.direction)))
            .collect();
        over.push(format!("ORDER BY {}", keys.join(", ")));
    }

    format!("{}({args}) OVER ({})", spec.function, over.join(" "))
}

pub fn direction(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(literal(&Literal::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(literal(&Literal::Float(2.5)), "2.5");
        assert_eq!(literal(&Literal::Bool(false)), "FALSE");
    }

    #[test]
    fn test_predicates() {
        let num = Some(SemanticType::Number);
        assert_eq!(
            predicate("e.id", &Predicate::new(Operator::In, "10,20, 30"), num).unwrap(),
            "e.id IN (10, 20, 30)"
        );
        assert_eq!(
            predicate("e.hired", &Predicate::between(Operator::NotBetween, "2020-01-01", "2021-01-01"), Some(SemanticType::Date))
                .unwrap(),
            "e.hired NOT BETWEEN '2020-01-01' AND '2021-01-01'"
        );
        assert_eq!(
            predicate("e.name", &Predicate::new(Operator::Like, "A%"), Some(SemanticType::String)).unwrap(),
            "e.name LIKE 'A%'"
        );
        assert_eq!(predicate("e.x", &Predicate::unary(Operator::IsNull), None).unwrap(), "e.x IS NULL");
        assert_eq!(predicate("e.x", &Predicate::unary(Operator::Exists), None).unwrap(), "e.x IS NOT NULL");
        assert_eq!(
            predicate("e.x", &Predicate::new(Operator::Exists, "SELECT 1 FROM t"), None).unwrap(),
            "EXISTS (SELECT 1 FROM t)"
        );
        assert_eq!(predicate("e.x", &Predicate::new(Operator::Gt, ""), num), None);
    }

    #[test]
    fn test_unparseable_value_passes_through_as_text() {
        let num = Some(SemanticType::Number);
        assert_eq!(predicate("e.id", &Predicate::new(Operator::Eq, "abc"), num).unwrap(), "e.id = 'abc'");
        assert_eq!(predicate("e.id", &Predicate::new(Operator::Eq, "7"), None).unwrap(), "e.id = 7");
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(aggregate(Accumulator::CountDistinct, "e.id", Dialect::Generic), "COUNT(DISTINCT e.id)");
        assert_eq!(aggregate(Accumulator::AddToSet, "e.tag", Dialect::PostgreSQL), "ARRAY_AGG(DISTINCT e.tag)");
        assert_eq!(aggregate(Accumulator::Push, "e.tag", Dialect::MySQL), "JSON_ARRAYAGG(e.tag)");
        assert_eq!(aggregate(Accumulator::First, "e.tag", Dialect::Generic), "ANY_VALUE(e.tag)");
    }

    #[test]
    fn test_windows() {
        let key = FieldKey::new("employees", "salary");
        let rank = WindowSpec::new(WindowFunction::Rank)
            .partition_by(FieldKey::new("employees", "department_id"))
            .order_by(key.clone(), SortDirection::Desc);
        assert_eq!(
            window(&rank, "employees.salary", Dialect::Generic),
            "RANK() OVER (PARTITION BY employees.department_id ORDER BY employees.salary DESC)"
        );

        let mut lag = WindowSpec::new(WindowFunction::Lag).order_by(key, SortDirection::Asc);
        lag.offset = Some(2);
        assert_eq!(
            window(&lag, "employees.salary", Dialect::Generic),
            "LAG(employees.salary, 2) OVER (ORDER BY employees.salary ASC)"
        );

        let sum = WindowSpec::new(WindowFunction::Sum);
        assert_eq!(window(&sum, "e.x", Dialect::Generic), "SUM(e.x) OVER ()");
    }
}
