//! Value coercion and validation against a field's semantic type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::filter::{Operator, Predicate};
use crate::types::SemanticType;

/// A filter value after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// `raw` as typed, `iso` normalized to an RFC 3339 UTC instant.
    Date { raw: String, iso: String },
    Text(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error("`{0}` is not a valid date")]
    NotADate(String),
    #[error("`{0}` is not a boolean")]
    NotABoolean(String),
    #[error("{0} needs a value")]
    MissingValue(Operator),
    #[error("{0} needs a second value")]
    MissingSecondValue(Operator),
}

const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "1"];
const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "0"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Coerce `raw` to the literal its field type calls for.
pub fn coerce(ty: SemanticType, raw: &str) -> Result<Literal, ValueError> {
    let raw = raw.trim();
    match ty {
        SemanticType::Number => parse_number(raw).ok_or_else(|| ValueError::NotANumber(raw.to_string())),
        SemanticType::Date => parse_date(raw).ok_or_else(|| ValueError::NotADate(raw.to_string())),
        SemanticType::Boolean => parse_bool(raw)
            .map(Literal::Bool)
            .ok_or_else(|| ValueError::NotABoolean(raw.to_string())),
        SemanticType::Array | SemanticType::Object => Ok(serde_json::from_str(raw)
            .map(Literal::Json)
            .unwrap_or_else(|_| Literal::Text(raw.to_string()))),
        SemanticType::String => Ok(Literal::Text(raw.to_string())),
    }
}

/// Like [`coerce`], but a value that fails coercion passes through as text.
pub fn coerce_or_text(ty: SemanticType, raw: &str) -> Literal {
    coerce(ty, raw).unwrap_or_else(|err| {
        log::debug!("passing value through as text: {err}");
        Literal::Text(raw.trim().to_string())
    })
}

/// Best guess for a value whose field type is unknown.
pub fn infer(raw: &str) -> Literal {
    let raw = raw.trim();
    if let Some(number) = parse_number(raw) {
        return number;
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        "null" => Literal::Null,
        _ => Literal::Text(raw.to_string()),
    }
}

/// Check every value of `predicate` against `ty`. This is what gates the
/// "apply filter" action; the generators never see a rejected value.
pub fn validate_predicate(ty: SemanticType, predicate: &Predicate) -> Result<(), ValueError> {
    let op = predicate.operator;

    if op.takes_list() {
        let items = predicate.list_values();
        if items.is_empty() {
            return Err(ValueError::MissingValue(op));
        }
        for item in items {
            coerce(ty, item)?;
        }
        return Ok(());
    }

    if !op.needs_value() {
        return Ok(());
    }
    if predicate.value().is_empty() {
        return Err(ValueError::MissingValue(op));
    }
    if op.is_pattern() {
        return Ok(());
    }
    coerce(ty, predicate.value())?;

    if op.needs_second_value() {
        let second = predicate
            .second_value()
            .ok_or(ValueError::MissingSecondValue(op))?;
        coerce(ty, second)?;
    }
    Ok(())
}

fn parse_number(raw: &str) -> Option<Literal> {
    if !is_numeric_literal(raw) {
        return None;
    }
    let unsigned = raw.strip_prefix('+').unwrap_or(raw);
    if let Ok(int) = unsigned.parse::<i64>() {
        return Some(Literal::Int(int));
    }
    unsigned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Literal::Float)
}

/// `[+-]? digits [. digits] [e [+-] digits]`, also `.5` and `5.`.
fn is_numeric_literal(raw: &str) -> bool {
    let body = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };

    let mut parts = mantissa.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !digits(int_part) || !digits(frac_part) || int_part.len() + frac_part.len() == 0 {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !exp.is_empty() && digits(exp)
        }
    }
}

fn parse_date(raw: &str) -> Option<Literal> {
    let iso = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    } else if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    } else {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
    };

    Some(Literal::Date {
        raw: raw.to_string(),
        iso,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    let lower = raw.to_ascii_lowercase();
    if TRUE_TOKENS.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(coerce(SemanticType::Number, "42"), Ok(Literal::Int(42)));
        assert_eq!(coerce(SemanticType::Number, "-3.5"), Ok(Literal::Float(-3.5)));
        assert_eq!(coerce(SemanticType::Number, "+7"), Ok(Literal::Int(7)));
        assert_eq!(coerce(SemanticType::Number, "1e3"), Ok(Literal::Float(1000.0)));
        assert!(coerce(SemanticType::Number, "12abc").is_err());
        assert!(coerce(SemanticType::Number, "inf").is_err());
        assert!(coerce(SemanticType::Number, ".").is_err());
        assert!(coerce(SemanticType::Number, "").is_err());
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            coerce(SemanticType::Date, "2024-03-01"),
            Ok(Literal::Date {
                raw: "2024-03-01".into(),
                iso: "2024-03-01T00:00:00.000Z".into(),
            })
        );
        assert!(matches!(
            coerce(SemanticType::Date, "2024-03-01T10:30:00+02:00"),
            Ok(Literal::Date { ref iso, .. }) if iso == "2024-03-01T08:30:00.000Z"
        ));
        assert!(coerce(SemanticType::Date, "2024-03-01 10:30").is_ok());
        assert_eq!(
            coerce(SemanticType::Date, "2024-02-30"),
            Err(ValueError::NotADate("2024-02-30".into()))
        );
    }

    #[test]
    fn test_booleans() {
        assert_eq!(coerce(SemanticType::Boolean, "Yes"), Ok(Literal::Bool(true)));
        assert_eq!(coerce(SemanticType::Boolean, "0"), Ok(Literal::Bool(false)));
        assert!(coerce(SemanticType::Boolean, "maybe").is_err());
    }

    #[test]
    fn test_containers_fall_back_to_text() {
        assert_eq!(
            coerce(SemanticType::Array, "[1, 2]"),
            Ok(Literal::Json(serde_json::json!([1, 2])))
        );
        assert_eq!(coerce(SemanticType::Object, "abc"), Ok(Literal::Text("abc".into())));
    }

    #[test]
    fn test_passthrough_and_inference() {
        assert_eq!(coerce_or_text(SemanticType::Number, "abc"), Literal::Text("abc".into()));
        assert_eq!(infer("10"), Literal::Int(10));
        assert_eq!(infer("TRUE"), Literal::Bool(true));
        assert_eq!(infer("Sales"), Literal::Text("Sales".into()));
    }

    #[test]
    fn test_validate_predicate() {
        let num = SemanticType::Number;
        assert!(validate_predicate(num, &Predicate::new(Operator::In, "10, 20, 30")).is_ok());
        assert_eq!(
            validate_predicate(num, &Predicate::new(Operator::In, "10, x")),
            Err(ValueError::NotANumber("x".into()))
        );
        assert_eq!(
            validate_predicate(num, &Predicate::new(Operator::Between, "1")),
            Err(ValueError::MissingSecondValue(Operator::Between))
        );
        assert!(validate_predicate(num, &Predicate::new(Operator::Like, "%1%")).is_ok());
        assert!(validate_predicate(num, &Predicate::unary(Operator::IsNull)).is_ok());
        assert_eq!(
            validate_predicate(SemanticType::String, &Predicate::new(Operator::Eq, "")),
            Err(ValueError::MissingValue(Operator::Eq))
        );
    }
}
