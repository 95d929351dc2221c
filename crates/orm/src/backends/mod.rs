//! Database backend abstraction
//!
//! The ORM core never talks to a driver directly; it consumes the
//! [`DatabaseConnection`] trait and receives rows through [`DatabaseRow`].
//! Two implementations ship with the crate: a Postgres adapter over sqlx and
//! an in-memory scripted connection used by test suites.

pub mod core;
pub mod memory;
pub mod postgres;

pub use core::{DatabaseConnection, DatabaseRow, DatabaseValue};
pub use memory::{ExecutedStatement, MemoryConnection, MemoryRow};
pub use postgres::PostgresConnection;
