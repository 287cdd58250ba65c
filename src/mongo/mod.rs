//! MongoDB aggregation pipeline generation.

mod format;
mod operators;
mod pipeline;

pub use format::{generate, Options, Output, PLACEHOLDER};
pub use operators::{like_to_regex, mongo_operator, sql_operator, translate, OPERATOR_TABLE};
pub use pipeline::{build, field_path, stages, Pipeline};
