//! Query Builder Module - fluent, backend-neutral query description
//!
//! A [`QueryBuilder`] is plain data. Connections either compile it to SQL
//! (`to_sql_with_params`) or evaluate it directly.

pub mod builder;
pub mod dml;
pub mod execution;
pub mod joins;
pub mod ordering;
pub mod pagination;
pub mod select;
pub mod sql_generation;
pub mod types;
pub mod where_clause;

pub use builder::QueryBuilder;
pub use types::{
    compare_values, Aggregate, ConditionKind, Connective, JoinType, OrderDirection, QueryOperator,
    QueryType, Row, WhereCondition,
};
