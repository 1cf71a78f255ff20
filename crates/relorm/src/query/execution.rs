//! Query Builder execution against a [`Connection`]

use serde_json::Value;
use tracing::trace;

use super::builder::QueryBuilder;
use super::types::{QueryType, Row};
use crate::backends::Connection;
use crate::error::ModelResult;
use crate::security::validate_table_reference;

impl QueryBuilder {
    fn validated(&self) -> ModelResult<()> {
        for table in &self.from_tables {
            validate_table_reference(table)?;
        }
        for join in &self.joins {
            validate_table_reference(&join.table)?;
        }
        Ok(())
    }

    /// Execute query and return raw rows
    pub async fn get(&self, conn: &dyn Connection) -> ModelResult<Vec<Row>> {
        self.validated()?;
        let rows = conn.select(self).await?;
        trace!(table = ?self.table_name(), rows = rows.len(), "fetched rows");
        Ok(rows)
    }

    /// Execute query and return first row
    pub async fn first(&self, conn: &dyn Connection) -> ModelResult<Option<Row>> {
        let query = self.clone().limit(1);
        Ok(query.get(conn).await?.into_iter().next())
    }

    /// Count query results
    pub async fn count(&self, conn: &dyn Connection) -> ModelResult<i64> {
        let query = self.clone().count_query();
        let rows = query.get(conn).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    pub async fn exists(&self, conn: &dyn Connection) -> ModelResult<bool> {
        Ok(self.first(conn).await?.is_some())
    }

    /// Run an INSERT, UPDATE or DELETE built on this query
    pub async fn execute(&self, conn: &dyn Connection) -> ModelResult<u64> {
        self.validated()?;
        if self.query_type == QueryType::Insert && self.insert_rows.is_empty() {
            return Ok(0);
        }
        conn.execute(self).await
    }

    /// Run a single-row INSERT and return the generated key
    pub async fn insert_get_id(&self, conn: &dyn Connection, key: &str) -> ModelResult<Value> {
        self.validated()?;
        conn.insert_get_id(self, key).await
    }
}
