//! Query Builder WHERE clause operations

use super::builder::QueryBuilder;
use super::types::*;
use serde_json::Value;

impl QueryBuilder {
    fn push_condition(mut self, connective: Connective, kind: ConditionKind) -> Self {
        self.where_conditions.push(WhereCondition { connective, kind });
        self
    }

    /// Add WHERE condition with equality
    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::Equal, value)
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::NotEqual, value)
    }

    /// Add WHERE condition with greater than
    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::GreaterThan, value)
    }

    /// Add WHERE condition with greater than or equal
    pub fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::GreaterThanOrEqual, value)
    }

    /// Add WHERE condition with less than
    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::LessThan, value)
    }

    /// Add WHERE condition with less than or equal
    pub fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::LessThanOrEqual, value)
    }

    /// Add WHERE condition with LIKE
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, QueryOperator::Like, pattern)
    }

    /// Add WHERE condition with an explicit operator
    pub fn where_op<T: Into<Value>>(self, column: &str, operator: QueryOperator, value: T) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::Basic {
                column: column.to_string(),
                operator,
                value: value.into(),
            },
        )
    }

    /// Add OR WHERE condition with an explicit operator
    pub fn or_where_op<T: Into<Value>>(
        self,
        column: &str,
        operator: QueryOperator,
        value: T,
    ) -> Self {
        self.push_condition(
            Connective::Or,
            ConditionKind::Basic {
                column: column.to_string(),
                operator,
                value: value.into(),
            },
        )
    }

    /// Add OR WHERE condition with equality
    pub fn or_where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.or_where_op(column, QueryOperator::Equal, value)
    }

    /// Add WHERE condition with IN
    pub fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated: false,
            },
        )
    }

    /// Add OR WHERE condition with IN
    pub fn or_where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_condition(
            Connective::Or,
            ConditionKind::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated: false,
            },
        )
    }

    /// Add WHERE condition with NOT IN
    pub fn where_not_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated: true,
            },
        )
    }

    /// Add WHERE condition with IS NULL
    pub fn where_null(self, column: &str) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::Null {
                column: column.to_string(),
                negated: false,
            },
        )
    }

    /// Add OR WHERE condition with IS NULL
    pub fn or_where_null(self, column: &str) -> Self {
        self.push_condition(
            Connective::Or,
            ConditionKind::Null {
                column: column.to_string(),
                negated: false,
            },
        )
    }

    /// Add WHERE condition with IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::Null {
                column: column.to_string(),
                negated: true,
            },
        )
    }

    /// Add WHERE condition with BETWEEN
    pub fn where_between<T: Into<Value>>(self, column: &str, low: T, high: T) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::Between {
                column: column.to_string(),
                low: low.into(),
                high: high.into(),
            },
        )
    }

    /// Compare two columns, e.g. `posts.user_id = users.id`
    pub fn where_column(self, first: &str, operator: QueryOperator, second: &str) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::Column {
                first: first.to_string(),
                operator,
                second: second.to_string(),
            },
        )
    }

    /// Add raw WHERE condition; `?` marks a binding
    pub fn where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_condition(
            Connective::And,
            ConditionKind::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    /// Add raw OR WHERE condition; `?` marks a binding
    pub fn or_where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_condition(
            Connective::Or,
            ConditionKind::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    /// Group conditions built by `f` inside parentheses
    pub fn where_nested<F>(self, connective: Connective, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let nested = f(QueryBuilder::new());
        if nested.where_conditions.is_empty() {
            return self;
        }
        self.push_condition(connective, ConditionKind::Nested(nested.where_conditions))
    }

    /// Compare the row count of a correlated subquery against `count`
    pub fn where_count(
        self,
        connective: Connective,
        subquery: QueryBuilder,
        operator: QueryOperator,
        count: i64,
    ) -> Self {
        self.push_condition(
            connective,
            ConditionKind::Count {
                query: Box::new(subquery.count_query()),
                operator,
                count,
            },
        )
    }

    /// Add EXISTS / NOT EXISTS subquery condition
    pub fn where_exists(
        self,
        connective: Connective,
        subquery: QueryBuilder,
        negated: bool,
    ) -> Self {
        self.push_condition(
            connective,
            ConditionKind::Exists {
                query: Box::new(subquery),
                negated,
            },
        )
    }

    /// Append already-built conditions, keeping their connectives
    pub fn merge_wheres(mut self, conditions: Vec<WhereCondition>) -> Self {
        self.where_conditions.extend(conditions);
        self
    }
}
