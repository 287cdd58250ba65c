//! Query annotation model: which fields are projected, filtered, aggregated,
//! windowed and sorted, plus statement options.

mod column;
mod filter;
mod model;
mod options;
mod value;

pub use column::{
    Accumulator, Aggregation, ColumnRef, FieldKey, OrderKey, Sort, SortDirection, WindowFunction, WindowSpec,
};
pub use filter::{split_list, Operator, Predicate};
pub use model::{having_type, Query, QueryError};
pub use options::{
    CustomStage, CustomStageKind, JoinType, LookupType, QueryOptions, SetOperation, SetOperator, SortKey,
    StagePosition,
};
pub use value::{coerce, coerce_or_text, infer, validate_predicate, Literal, ValueError};
