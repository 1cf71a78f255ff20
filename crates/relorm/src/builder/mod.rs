//! Model-aware query builder
//!
//! [`Builder`] wraps a [`QueryBuilder`] with the model it reads, the connection
//! to run on, requested eager loads, global scopes, macros and an optional
//! delete hook. Terminal methods apply the global scopes exactly once, run the
//! query, hydrate [`Record`](crate::model::Record)s and eager load relations.
//!
//! - `eager`: eager-load registration and resolution
//! - `existence`: `has` / `where_has` filters
//! - `terminal`: reads, writes and chunking
//! - `dispatch`: macros, local scopes and dynamic calls by name

pub mod dispatch;
pub mod eager;
pub mod existence;
pub mod terminal;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

pub use dispatch::Macro;
pub use eager::{EagerConstraint, EagerLoad};

use crate::backends::ConnectionRef;
use crate::error::{ModelError, OrmResult};
use crate::model::{AliasedModel, ModelRef, Scope};
use crate::query::{
    ConditionKind, Connective, OrderDirection, QueryBuilder, QueryOperator, WhereCondition,
};
use crate::security::split_alias;

/// Boxed future used where async calls recurse (eager loading) or are stored (delete hooks)
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Replacement for the hard delete, e.g. a soft delete
pub type DeleteHook = Arc<dyn Fn(Builder) -> BoxFuture<'static, OrmResult<u64>> + Send + Sync>;

#[derive(Clone)]
pub struct Builder {
    model: ModelRef,
    query: QueryBuilder,
    connection: Option<ConnectionRef>,
    eager_load: Vec<(String, Option<EagerConstraint>)>,
    scopes: Vec<(String, Arc<dyn Scope>)>,
    removed_scopes: HashSet<String>,
    scopes_applied: bool,
    local_macros: HashMap<String, Macro>,
    on_delete: Option<DeleteHook>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("model", &self.model.model_name())
            .field("query", &self.query)
            .field("eager_load", &self.eager_loads())
            .field("scopes", &self.scopes.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>())
            .field("removed_scopes", &self.removed_scopes)
            .field("macros", &self.local_macros.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Builder {
    /// Builder for `model`, with the model's global scopes registered
    pub fn new(model: ModelRef, connection: Option<ConnectionRef>) -> Self {
        let query = QueryBuilder::table(model.table_name());
        let mut builder = Self {
            model: model.clone(),
            query,
            connection,
            eager_load: Vec::new(),
            scopes: Vec::new(),
            removed_scopes: HashSet::new(),
            scopes_applied: false,
            local_macros: HashMap::new(),
            on_delete: None,
        };
        for (identifier, scope) in model.global_scopes() {
            builder = builder.with_global_scope(&identifier, scope);
        }
        builder
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn connection(&self) -> Option<&ConnectionRef> {
        self.connection.as_ref()
    }

    pub fn with_connection(mut self, connection: ConnectionRef) -> Self {
        self.connection = Some(connection);
        self
    }

    /// The underlying SQL builder, without global scopes
    pub fn to_base(&self) -> &QueryBuilder {
        &self.query
    }

    /// The underlying SQL builder with global scopes applied
    pub fn to_query(&self) -> QueryBuilder {
        self.clone().apply_scopes().query
    }

    /// SQL text with global scopes applied
    pub fn to_sql(&self) -> String {
        self.to_query().to_sql()
    }

    pub(crate) fn require_connection(&self) -> OrmResult<ConnectionRef> {
        self.connection.clone().ok_or_else(|| {
            ModelError::Connection(format!(
                "No connection bound to builder for model [{}]",
                self.model.model_name()
            ))
        })
    }

    /// Read the model's table under `alias`.
    ///
    /// Columns qualified through [`Builder::model`], global scopes included,
    /// follow the alias, and so do join conditions naming the table.
    pub fn aliased(mut self, alias: &str) -> Self {
        let reference = self.model.table_name().to_string();
        let table = self
            .query
            .table_name()
            .map(|t| split_alias(t).map_or(t, |(table, _)| table).to_string())
            .unwrap_or_else(|| reference.clone());
        self.model = Arc::new(AliasedModel::new(self.model.clone(), alias));
        self.query = self
            .query
            .from(&format!("{} as {}", table, alias))
            .rename_join_references(&reference, alias);
        self
    }

    pub(crate) fn map_base<F: FnOnce(QueryBuilder) -> QueryBuilder>(mut self, f: F) -> Self {
        self.query = f(self.query);
        self
    }

    // --- global scopes ---------------------------------------------------

    /// Register a global scope; the scope may extend the builder with macros or hooks
    pub fn with_global_scope(mut self, identifier: &str, scope: Arc<dyn Scope>) -> Self {
        self.scopes.retain(|(id, _)| id != identifier);
        self.removed_scopes.remove(identifier);
        self.scopes.push((identifier.to_string(), scope.clone()));
        scope.extend(self)
    }

    /// Swap the scope registered under `identifier`, keeping its removal state
    pub(crate) fn replace_global_scope(mut self, identifier: &str, scope: Arc<dyn Scope>) -> Self {
        if let Some(entry) = self.scopes.iter_mut().find(|(id, _)| id == identifier) {
            entry.1 = scope;
        }
        self
    }

    pub fn without_global_scope(mut self, identifier: &str) -> Self {
        self.removed_scopes.insert(identifier.to_string());
        self
    }

    pub fn without_global_scopes(mut self) -> Self {
        for (identifier, _) in &self.scopes {
            self.removed_scopes.insert(identifier.clone());
        }
        self
    }

    /// Identifiers of the scopes removed from this builder
    pub fn removed_scopes(&self) -> Vec<&str> {
        self.removed_scopes.iter().map(String::as_str).collect()
    }

    /// Apply every registered, non-removed global scope; a no-op the second time
    pub(crate) fn apply_scopes(mut self) -> Self {
        if self.scopes_applied {
            return self;
        }
        self.scopes_applied = true;

        let scopes: Vec<Arc<dyn Scope>> = self
            .scopes
            .iter()
            .filter(|(id, _)| !self.removed_scopes.contains(id))
            .map(|(_, scope)| scope.clone())
            .collect();
        if scopes.is_empty() {
            return self;
        }

        // Keep `a OR b` from absorbing the scope constraints
        if contains_or(&self.query.where_conditions) {
            let existing = std::mem::take(&mut self.query.where_conditions);
            self.query.where_conditions.push(WhereCondition {
                connective: Connective::And,
                kind: ConditionKind::Nested(existing),
            });
        }

        let model = self.model.clone();
        for scope in scopes {
            self = self.call_scope(|builder| scope.apply(builder, model.as_ref()));
        }
        self
    }

    /// Run `f` on the builder, grouping whatever it adds in parentheses if it added an OR
    pub(crate) fn call_scope<F: FnOnce(Self) -> Self>(self, f: F) -> Self {
        let before = self.query.where_conditions.len();
        let mut builder = f(self);
        builder.group_added_conditions(before);
        builder
    }

    pub(crate) fn try_call_scope<F>(self, f: F) -> OrmResult<Self>
    where
        F: FnOnce(Self) -> OrmResult<Self>,
    {
        let before = self.query.where_conditions.len();
        let mut builder = f(self)?;
        builder.group_added_conditions(before);
        Ok(builder)
    }

    fn group_added_conditions(&mut self, before: usize) {
        let conditions = &mut self.query.where_conditions;
        if before > conditions.len() {
            return;
        }
        let added = conditions.split_off(before);
        if before > 0 && contains_or(&added) {
            conditions.push(WhereCondition {
                connective: Connective::And,
                kind: ConditionKind::Nested(added),
            });
        } else {
            conditions.extend(added);
        }
    }

    // --- delete hook -----------------------------------------------------

    /// Replace the hard delete performed by `delete()`
    pub fn on_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn(Builder) -> BoxFuture<'static, OrmResult<u64>> + Send + Sync + 'static,
    {
        self.on_delete = Some(Arc::new(hook));
        self
    }

    pub fn has_delete_hook(&self) -> bool {
        self.on_delete.is_some()
    }

    // --- SQL builder delegation ------------------------------------------

    pub fn select(self, columns: &str) -> Self {
        self.map_base(|q| q.select(columns))
    }

    pub fn select_columns<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map_base(|q| q.select_columns(columns))
    }

    pub fn add_select(self, column: &str) -> Self {
        self.map_base(|q| q.add_select(column))
    }

    pub fn distinct(self, columns: &str) -> Self {
        self.map_base(|q| q.select_distinct(columns))
    }

    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.where_eq(column, value))
    }

    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.where_ne(column, value))
    }

    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.where_gt(column, value))
    }

    pub fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.where_gte(column, value))
    }

    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.where_lt(column, value))
    }

    pub fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.where_lte(column, value))
    }

    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.map_base(|q| q.where_like(column, pattern))
    }

    pub fn where_op<T: Into<Value>>(self, column: &str, operator: QueryOperator, value: T) -> Self {
        self.map_base(|q| q.where_op(column, operator, value))
    }

    pub fn or_where_op<T: Into<Value>>(
        self,
        column: &str,
        operator: QueryOperator,
        value: T,
    ) -> Self {
        self.map_base(|q| q.or_where_op(column, operator, value))
    }

    pub fn or_where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_base(|q| q.or_where_eq(column, value))
    }

    pub fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.map_base(|q| q.where_in(column, values))
    }

    pub fn or_where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.map_base(|q| q.or_where_in(column, values))
    }

    pub fn where_not_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.map_base(|q| q.where_not_in(column, values))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.map_base(|q| q.where_null(column))
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.map_base(|q| q.or_where_null(column))
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.map_base(|q| q.where_not_null(column))
    }

    pub fn where_between<T: Into<Value>>(self, column: &str, low: T, high: T) -> Self {
        self.map_base(|q| q.where_between(column, low, high))
    }

    pub fn where_column(self, first: &str, operator: QueryOperator, second: &str) -> Self {
        self.map_base(|q| q.where_column(first, operator, second))
    }

    pub fn where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.map_base(|q| q.where_raw(sql, bindings))
    }

    pub fn or_where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.map_base(|q| q.or_where_raw(sql, bindings))
    }

    /// Group conditions built by `f` in parentheses
    pub fn where_nested<F>(self, connective: Connective, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.map_base(|q| q.where_nested(connective, f))
    }

    /// Constrain to one primary key value
    pub fn where_key(self, id: impl Into<Value>) -> Self {
        let column = self.model.qualify_column(self.model.primary_key_name());
        self.where_eq(&column, id)
    }

    pub fn where_key_in<T: Into<Value>>(self, ids: Vec<T>) -> Self {
        let column = self.model.qualify_column(self.model.primary_key_name());
        self.where_in(&column, ids)
    }

    pub fn where_key_not<T: Into<Value>>(self, ids: Vec<T>) -> Self {
        let column = self.model.qualify_column(self.model.primary_key_name());
        self.where_not_in(&column, ids)
    }

    pub fn join(self, table: &str, left: &str, right: &str) -> Self {
        self.map_base(|q| q.join(table, left, right))
    }

    pub fn left_join(self, table: &str, left: &str, right: &str) -> Self {
        self.map_base(|q| q.left_join(table, left, right))
    }

    pub fn right_join(self, table: &str, left: &str, right: &str) -> Self {
        self.map_base(|q| q.right_join(table, left, right))
    }

    pub fn order_by(self, column: &str) -> Self {
        self.map_base(|q| q.order_by(column))
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.map_base(|q| q.order_by_desc(column))
    }

    pub fn order_by_direction(self, column: &str, direction: OrderDirection) -> Self {
        self.map_base(|q| q.order_by_direction(column, direction))
    }

    /// Newest first by `column`, the creation timestamp by default
    pub fn latest(self, column: Option<&str>) -> Self {
        let column = column.unwrap_or(self.model.created_at_column()).to_string();
        self.order_by_desc(&column)
    }

    pub fn oldest(self, column: Option<&str>) -> Self {
        let column = column.unwrap_or(self.model.created_at_column()).to_string();
        self.order_by(&column)
    }

    pub fn reorder(self) -> Self {
        self.map_base(QueryBuilder::reorder)
    }

    pub fn group_by(self, column: &str) -> Self {
        self.map_base(|q| q.group_by(column))
    }

    pub fn limit(self, count: i64) -> Self {
        self.map_base(|q| q.limit(count))
    }

    pub fn offset(self, count: i64) -> Self {
        self.map_base(|q| q.offset(count))
    }

    pub fn take(self, count: i64) -> Self {
        self.limit(count)
    }

    pub fn skip(self, count: i64) -> Self {
        self.offset(count)
    }

    pub fn for_page(self, page: i64, per_page: i64) -> Self {
        self.map_base(|q| q.for_page(page, per_page))
    }
}

fn contains_or(conditions: &[WhereCondition]) -> bool {
    conditions.iter().any(|c| c.connective == Connective::Or)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{closure_scope, Model, SoftDeletingScope};

    #[derive(Debug)]
    struct Article;

    impl Model for Article {
        fn table_name(&self) -> &str {
            "articles"
        }

        fn model_name(&self) -> &str {
            "Article"
        }

        fn global_scopes(&self) -> Vec<(String, Arc<dyn Scope>)> {
            vec![
                SoftDeletingScope::registration(),
                (
                    "published".to_string(),
                    closure_scope(|b: Builder| b.where_eq("articles.published", true)),
                ),
            ]
        }
    }

    fn articles() -> Builder {
        Builder::new(Arc::new(Article), None)
    }

    #[test]
    fn test_global_scopes_applied_once() {
        let query = articles().where_eq("title", "x").apply_scopes().apply_scopes().query;
        assert_eq!(
            query.to_sql(),
            concat!(
                r#"SELECT * FROM "articles" WHERE "title" = $1 "#,
                r#"AND "articles"."deleted_at" IS NULL AND "articles"."published" = $2"#
            )
        );
    }

    #[test]
    fn test_or_conditions_are_grouped_before_scopes() {
        let sql = articles()
            .without_global_scope("published")
            .where_eq("a", 1)
            .or_where_eq("b", 2)
            .to_sql();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT * FROM "articles" WHERE ("a" = $1 OR "b" = $2) "#,
                r#"AND "articles"."deleted_at" IS NULL"#
            )
        );
    }

    #[test]
    fn test_without_global_scopes() {
        let builder = articles().without_global_scopes();
        assert_eq!(builder.to_sql(), r#"SELECT * FROM "articles""#);
        let mut removed = builder.removed_scopes();
        removed.sort();
        assert_eq!(removed, vec!["published", "soft_deletes"]);
    }

    #[test]
    fn test_soft_delete_scope_registers_hook() {
        assert!(articles().has_delete_hook());
    }

    #[test]
    fn test_where_key_is_qualified() {
        let sql = articles().without_global_scopes().where_key(5).to_sql();
        assert_eq!(sql, r#"SELECT * FROM "articles" WHERE "articles"."id" = $1"#);
    }

    #[test]
    fn test_aliased_builder_qualifies_against_alias() {
        let builder = articles()
            .without_global_scope("published")
            .join("authors", "authors.id", "articles.author_id")
            .aliased("a2")
            .where_key(5);
        assert_eq!(builder.model().table_name(), "a2");
        assert_eq!(
            builder.to_sql(),
            concat!(
                r#"SELECT * FROM "articles" AS "a2" "#,
                r#"INNER JOIN "authors" ON "authors"."id" = "a2"."author_id" "#,
                r#"WHERE "a2"."id" = $1 AND "a2"."deleted_at" IS NULL"#
            )
        );
    }
}
