//! Core Database Backend Traits
//!
//! The ORM never talks to a driver directly. Everything goes through
//! [`Connection`], which receives structured [`QueryBuilder`] values so that a
//! backend is free to compile them to SQL or evaluate them some other way.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::OrmResult;
use crate::query::{QueryBuilder, Row};

/// Abstract database connection trait
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a SELECT and return its rows as ordered attribute maps
    async fn select(&self, query: &QueryBuilder) -> OrmResult<Vec<Row>>;

    /// Run an INSERT, UPDATE or DELETE and return the affected rows count
    async fn execute(&self, query: &QueryBuilder) -> OrmResult<u64>;

    /// Run a single-row INSERT and return the generated value of `key`
    async fn insert_get_id(&self, query: &QueryBuilder, key: &str) -> OrmResult<Value>;

    /// Short backend name used in logs
    fn backend_name(&self) -> &'static str;
}

/// Shared handle to a connection
pub type ConnectionRef = Arc<dyn Connection>;

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({})", self.backend_name())
    }
}
