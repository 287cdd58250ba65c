//! SQL dialect handling.

use serde::{Deserialize, Serialize};

/// SQL dialect variants.
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
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Dialect {
    /// Standard SQL
    #[default]
    #[strum(to_string = "generic", serialize = "ansi")]
    Generic,
    /// PostgreSQL
    #[serde(alias = "postgres")]
    #[strum(to_string = "postgresql", serialize = "postgres")]
    PostgreSQL,
    /// MySQL
    #[strum(to_string = "mysql", serialize = "mariadb")]
    MySQL,
}

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "column", "create", "cross", "default",
    "delete", "desc", "distinct", "else", "end", "except", "exists", "from", "full", "group", "having", "in",
    "index", "inner", "insert", "intersect", "into", "is", "join", "key", "left", "like", "limit", "not",
    "null", "offset", "on", "or", "order", "outer", "primary", "references", "right", "select", "set",
    "table", "then", "union", "update", "user", "using", "values", "when", "where", "window",
];

impl Dialect {
    fn quote_char(self) -> char {
        match self {
            Self::MySQL => '`',
            Self::Generic | Self::PostgreSQL => '"',
        }
    }

    /// Quote an identifier unless it is a plain, non-reserved word.
    pub fn quote_ident(self, ident: &str) -> String {
        if is_plain(ident) && !is_reserved(ident) {
            return ident.to_string();
        }
        let q = self.quote_char();
        let escaped = ident.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    pub fn supports_full_join(self) -> bool {
        !matches!(self, Self::MySQL)
    }

    /// MySQL has no OFFSET without LIMIT; the documented idiom is the
    /// largest unsigned BIGINT.
    pub fn requires_limit_for_offset(self) -> bool {
        matches!(self, Self::MySQL)
    }

    /// Function collecting values into an array.
    pub fn array_agg(self) -> &'static str {
        match self {
            Self::MySQL => "JSON_ARRAYAGG",
            Self::Generic | Self::PostgreSQL => "ARRAY_AGG",
        }
    }
}

fn is_plain(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_reserved(ident: &str) -> bool {
    let lower = ident.to_ascii_lowercase();
    RESERVED.contains(&lower.as_str())
}
