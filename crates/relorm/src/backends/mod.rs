//! Database Backend Abstractions
//!
//! [`PostgresConnection`] runs compiled SQL through sqlx. [`MemoryConnection`]
//! evaluates the same queries in memory for tests and prototyping.

pub mod core;
pub mod memory;
pub mod postgres;

pub use core::{Connection, ConnectionRef};
pub use memory::{LoggedQuery, MemoryConnection};
pub use postgres::PostgresConnection;
