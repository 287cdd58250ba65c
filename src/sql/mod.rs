//! SQL statement generation.

mod dialect;
mod expr;
mod generate;

pub use dialect::Dialect;
pub use generate::{generate, Options, PLACEHOLDER};
