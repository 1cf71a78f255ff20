//! Pivot rows of many-to-many junction tables

use serde::Serialize;
use serde_json::Value;

use crate::backends::Connection;
use crate::error::OrmResult;
use crate::query::{QueryBuilder, Row};

/// One row of a junction table, attached to a related record as `pivot`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pivot {
    table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    attributes: Row,
}

impl Pivot {
    pub fn new(
        table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
        attributes: Row,
    ) -> Self {
        Self {
            table: table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            attributes,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Value of the key pointing at the parent side
    pub fn foreign_key(&self) -> Value {
        self.get(&self.foreign_pivot_key).cloned().unwrap_or(Value::Null)
    }

    /// Value of the key pointing at the related side
    pub fn related_key(&self) -> Value {
        self.get(&self.related_pivot_key).cloned().unwrap_or(Value::Null)
    }

    fn scoped(&self, query: QueryBuilder) -> QueryBuilder {
        query
            .where_eq(&self.foreign_pivot_key, self.foreign_key())
            .where_eq(&self.related_pivot_key, self.related_key())
    }

    /// Update this junction row in place
    pub async fn update(&mut self, conn: &dyn Connection, values: Row) -> OrmResult<u64> {
        let query = self
            .scoped(QueryBuilder::table(&self.table))
            .into_update()
            .set_values(values.clone());
        let affected = query.execute(conn).await?;
        self.attributes.extend(values);
        Ok(affected)
    }

    /// Remove this junction row
    pub async fn delete(&self, conn: &dyn Connection) -> OrmResult<u64> {
        let query = self.scoped(QueryBuilder::new().delete_from(&self.table));
        query.execute(conn).await
    }
}
