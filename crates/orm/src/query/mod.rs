//! Fluent SQL query builder
//!
//! The chainable query-construction surface the ORM core layers its
//! constraints onto. Builders are plain owned data; cloning one yields a
//! fully independent query state.

pub mod builder;
pub mod dml;
pub mod execution;
pub mod joins;
pub mod ordering;
pub mod select;
pub mod sql_generation;
pub mod types;
pub mod where_clause;

pub use builder::QueryBuilder;
pub use types::{
    JoinClause, JoinType, OrderDirection, QueryOperator, QueryType, SetClause, WhereBoolean,
    WhereCondition,
};
