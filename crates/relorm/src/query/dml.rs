//! Query Builder DML operations (INSERT, UPDATE, DELETE)

use super::builder::QueryBuilder;
use super::types::*;
use serde_json::Value;

impl QueryBuilder {
    /// Start an INSERT query
    pub fn insert_into(mut self, table: &str) -> Self {
        self.query_type = QueryType::Insert;
        self.from_tables = vec![table.to_string()];
        self
    }

    /// Queue one row for an INSERT; the first row fixes the column list
    pub fn values(mut self, row: Row) -> Self {
        self.insert_rows.push(row);
        self
    }

    /// Queue many rows for an INSERT
    pub fn values_many(mut self, rows: Vec<Row>) -> Self {
        self.insert_rows.extend(rows);
        self
    }

    /// Turn the current query (table and WHERE clauses) into an UPDATE
    pub fn into_update(mut self) -> Self {
        self.query_type = QueryType::Update;
        self
    }

    /// Turn the current query (table and WHERE clauses) into a DELETE
    pub fn into_delete(mut self) -> Self {
        self.query_type = QueryType::Delete;
        self
    }

    /// Start a DELETE query
    pub fn delete_from(self, table: &str) -> Self {
        self.from(table).into_delete()
    }

    /// Set a column value (for UPDATE)
    pub fn set<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.set_clauses.push(SetClause {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Set a column to NULL (for UPDATE)
    pub fn set_null(self, column: &str) -> Self {
        self.set(column, Value::Null)
    }

    /// Set multiple values at once
    pub fn set_values(mut self, values: Row) -> Self {
        for (column, value) in values {
            self.set_clauses.push(SetClause { column, value });
        }
        self
    }

    pub fn insert_rows(&self) -> &[Row] {
        &self.insert_rows
    }
}
