//! Schema DSL to SQL and MongoDB aggregation pipelines.
//!
//! The schema text is parsed into entities and relationships, a [`Query`]
//! annotates the fields the user picked, and one of the two generators turns
//! both into statement text.

pub mod ast;
pub mod graph;
pub mod lexer;
pub mod mongo;
pub mod parser;
pub mod query;
pub mod sql;
pub mod types;

use serde::Serialize;
use wasm_bindgen::prelude::*;

use ast::Schema;
use parser::Parser;
use query::{Predicate, Query, QueryError, ValueError};
use types::SemanticType;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown semantic type `{0}`")]
    UnknownType(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Parse `schema_source` and compile `query` to SQL.
pub fn compile_sql(schema_source: &str, query: &Query, options: &sql::Options) -> String {
    sql::generate(query, &parse(schema_source), options)
}

/// Parse `schema_source` and compile `query` to an aggregation pipeline.
pub fn compile_pipeline(schema_source: &str, query: &Query, options: &mongo::Options) -> String {
    mongo::generate(query, &parse(schema_source), options)
}

fn parse(schema_source: &str) -> Schema {
    let parsed = Parser::new(schema_source).parse();
    for err in &parsed.errors {
        log::debug!("schema: {err}");
    }
    parsed.schema
}

/// Check a filter value for a field of `semantic_type` before it is applied.
pub fn validate_filter(semantic_type: &str, predicate: &Predicate) -> Result<(), Error> {
    let ty: SemanticType = semantic_type
        .parse()
        .map_err(|_| Error::UnknownType(semantic_type.to_string()))?;
    query::validate_predicate(ty, predicate)?;
    Ok(())
}

#[derive(Serialize)]
struct Diagnostic {
    line: usize,
    message: String,
}

#[derive(Serialize)]
struct SchemaReport<'a> {
    #[serde(flatten)]
    schema: &'a Schema,
    errors: Vec<Diagnostic>,
}

/// Initialize panic hook for better error messages in WASM
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

/// Parse schema text to `{ entities, relationships, errors }` JSON.
#[wasm_bindgen(js_name = "parseSchema")]
pub fn parse_schema_json(source: &str) -> Result<String, String> {
    let parsed = Parser::new(source).parse();
    let report = SchemaReport {
        schema: &parsed.schema,
        errors: parsed
            .errors
            .iter()
            .map(|e| Diagnostic {
                line: e.line(),
                message: e.to_string(),
            })
            .collect(),
    };
    serde_json::to_string(&report).map_err(|e| e.to_string())
}

/// Compile a JSON query definition to SQL.
#[wasm_bindgen(js_name = "generateSql")]
pub fn generate_sql_json(schema_source: &str, query_json: &str, options_json: Option<String>) -> Result<String, String> {
    let run = || -> Result<String, Error> {
        let query: Query = serde_json::from_str(query_json)?;
        let options: sql::Options = match options_json.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => sql::Options::default(),
        };
        Ok(compile_sql(schema_source, &query, &options))
    };
    run().map_err(|e| e.to_string())
}

/// Compile a JSON query definition to a pipeline.
#[wasm_bindgen(js_name = "generatePipeline")]
pub fn generate_pipeline_json(
    schema_source: &str,
    query_json: &str,
    options_json: Option<String>,
) -> Result<String, String> {
    let run = || -> Result<String, Error> {
        let query: Query = serde_json::from_str(query_json)?;
        let options: mongo::Options = match options_json.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => mongo::Options::default(),
        };
        Ok(compile_pipeline(schema_source, &query, &options))
    };
    run().map_err(|e| e.to_string())
}

/// Validation message for a filter, or `undefined` when it can be applied.
#[wasm_bindgen(js_name = "validateFilter")]
pub fn validate_filter_json(semantic_type: &str, predicate_json: &str) -> Option<String> {
    serde_json::from_str::<Predicate>(predicate_json)
        .map_err(Error::from)
        .and_then(|predicate| validate_filter(semantic_type, &predicate))
        .err()
        .map(|e| e.to_string())
}
