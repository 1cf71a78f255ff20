//! Query Builder SELECT operations

use super::builder::QueryBuilder;
use super::types::Aggregate;

impl QueryBuilder {
    /// Add SELECT fields to the query, comma separated
    pub fn select(mut self, fields: &str) -> Self {
        if fields == "*" {
            self.select_fields.push("*".to_string());
        } else {
            self.select_fields.extend(
                fields
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty()),
            );
        }
        self
    }

    /// Replace the SELECT list
    pub fn select_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_fields = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single column, possibly of the form `table.column as alias`
    pub fn add_select(mut self, column: &str) -> Self {
        self.select_fields.push(column.to_string());
        self
    }

    /// Add SELECT DISTINCT to the query
    pub fn select_distinct(mut self, fields: &str) -> Self {
        self.distinct = true;
        self.select(fields)
    }

    /// Set the FROM table
    pub fn from(mut self, table: &str) -> Self {
        self.from_tables = vec![table.to_string()];
        self
    }

    /// Add custom SELECT expression
    pub fn select_raw(mut self, expression: &str) -> Self {
        self.select_fields.push(expression.to_string());
        self
    }

    /// Turn the query into `SELECT COUNT(*) AS aggregate`
    pub fn count_query(mut self) -> Self {
        self.aggregate = Some(Aggregate::Count);
        self.order_by.clear();
        self
    }
}
