//! Pipeline stages as shell text or a JSON document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pipeline;
use crate::ast::Schema;
use crate::query::Query;

/// Shown in place of a pipeline when nothing is selected.
pub const PLACEHOLDER: &str = "// Select fields to build a pipeline";

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Output {
    /// `db.collection.aggregate([...])`
    #[default]
    Shell,
    /// The bare stage array.
    Json,
}

/// Pipeline generation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub output: Output,
    pub pretty: bool,
}

impl Options {
    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

/// Compile `query` against `schema` into pipeline text.
pub fn generate(query: &Query, schema: &Schema, options: &Options) -> String {
    let Some(pipeline) = pipeline::build(query, schema) else {
        return match options.output {
            Output::Shell => PLACEHOLDER.to_string(),
            Output::Json => "[]".to_string(),
        };
    };

    let stages = Value::Array(pipeline.stages);
    match options.output {
        Output::Json if options.pretty => format!("{stages:#}"),
        Output::Json => stages.to_string(),
        Output::Shell => {
            let mut out = String::new();
            write_shell(&stages, options.pretty, 0, &mut out);
            format!("{}.aggregate({out})", collection_handle(&pipeline.collection))
        }
    }
}

fn is_js_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn collection_handle(collection: &str) -> String {
    if is_js_identifier(collection) && !collection.starts_with('$') {
        format!("db.{collection}")
    } else {
        format!("db.getCollection({})", Value::from(collection))
    }
}

/// mongosh syntax: bare keys where possible, `ISODate(...)` for dates.
fn write_shell(value: &Value, pretty: bool, indent: usize, out: &mut String) {
    match value {
        Value::Object(map) => {
            if let (1, Some(Value::String(date))) = (map.len(), map.get("$date")) {
                out.push_str(&format!("ISODate({})", Value::from(date.as_str())));
                return;
            }
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            let entries: Vec<(String, &Value)> = map
                .iter()
                .map(|(k, v)| {
                    let key = if is_js_identifier(k) { k.clone() } else { Value::from(k.as_str()).to_string() };
                    (key, v)
                })
                .collect();
            write_items(out, pretty, indent, ('{', '}'), &entries, |(key, v), out| {
                out.push_str(key);
                out.push_str(": ");
                write_shell(v, pretty, indent + 1, out);
            });
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            write_items(out, pretty, indent, ('[', ']'), items, |item, out| {
                write_shell(item, pretty, indent + 1, out);
            });
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_items<T>(
    out: &mut String,
    pretty: bool,
    indent: usize,
    (open, close): (char, char),
    items: &[T],
    mut write: impl FnMut(&T, &mut String),
) {
    let pad = |level: usize| "  ".repeat(level);
    out.push(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if pretty {
            out.push('\n');
            out.push_str(&pad(indent + 1));
        } else if open == '{' || i > 0 {
            out.push(' ');
        }
        write(item, out);
    }
    if pretty {
        out.push('\n');
        out.push_str(&pad(indent));
    } else if open == '{' {
        out.push(' ');
    }
    out.push(close);
}
