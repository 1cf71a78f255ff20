//! Query Builder - Core builder implementation

use super::types::*;

/// Query builder for constructing database queries
///
/// Every method consumes the builder and returns it, so a builder shared by two
/// branches of calling code has to be cloned first.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub(crate) query_type: QueryType,
    pub(crate) select_fields: Vec<String>,
    pub(crate) from_tables: Vec<String>,
    pub(crate) set_clauses: Vec<SetClause>,
    pub(crate) insert_rows: Vec<Row>,
    pub(crate) where_conditions: Vec<WhereCondition>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) group_by: Vec<String>,
    pub(crate) limit_count: Option<i64>,
    pub(crate) offset_value: Option<i64>,
    pub(crate) distinct: bool,
    pub(crate) aggregate: Option<Aggregate>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new() -> Self {
        Self {
            query_type: QueryType::Select,
            select_fields: Vec::new(),
            from_tables: Vec::new(),
            set_clauses: Vec::new(),
            insert_rows: Vec::new(),
            where_conditions: Vec::new(),
            joins: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit_count: None,
            offset_value: None,
            distinct: false,
            aggregate: None,
        }
    }

    /// Shorthand for `QueryBuilder::new().from(table)`
    pub fn table(table: &str) -> Self {
        Self::new().from(table)
    }

    /// The primary table this query reads from or writes to
    pub fn table_name(&self) -> Option<&str> {
        self.from_tables.first().map(String::as_str)
    }

    pub fn query_type(&self) -> &QueryType {
        &self.query_type
    }

    pub fn conditions(&self) -> &[WhereCondition] {
        &self.where_conditions
    }

    pub fn select_fields(&self) -> &[String] {
        &self.select_fields
    }

    pub fn has_orders(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn limit_value(&self) -> Option<i64> {
        self.limit_count
    }
}
