//! Global scopes
//!
//! A scope adds constraints to every query of a model. It may also extend the
//! builder when registered, e.g. with macros or a delete hook; soft deletes are
//! built entirely this way.

use std::sync::Arc;

use serde_json::Value;

use super::core_trait::{fresh_timestamp, Model};
use crate::builder::Builder;
use crate::query::Row;

/// A constraint applied to every query for a model
pub trait Scope: Send + Sync {
    fn apply(&self, builder: Builder, model: &dyn Model) -> Builder;

    /// Called once when the scope is registered on a builder
    fn extend(&self, builder: Builder) -> Builder {
        builder
    }
}

/// Global scope backed by a closure
pub struct ClosureScope<F>(pub F);

impl<F> Scope for ClosureScope<F>
where
    F: Fn(Builder) -> Builder + Send + Sync,
{
    fn apply(&self, builder: Builder, _model: &dyn Model) -> Builder {
        (self.0)(builder)
    }
}

/// Wrap a closure as a shareable scope
pub fn closure_scope<F>(f: F) -> Arc<dyn Scope>
where
    F: Fn(Builder) -> Builder + Send + Sync + 'static,
{
    Arc::new(ClosureScope(f))
}

/// Hides rows whose `deleted_at` column is set and turns deletes into updates
#[derive(Debug, Clone)]
pub struct SoftDeletingScope {
    column: String,
}

impl SoftDeletingScope {
    /// Identifier the scope is registered under
    pub const IDENTIFIER: &'static str = "soft_deletes";

    pub fn new() -> Self {
        Self::with_column("deleted_at")
    }

    pub fn with_column(column: &str) -> Self {
        Self {
            column: column.to_string(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// `(identifier, scope)` pair for `Model::global_scopes`
    pub fn registration() -> (String, Arc<dyn Scope>) {
        (Self::IDENTIFIER.to_string(), Arc::new(Self::new()))
    }
}

impl Default for SoftDeletingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for SoftDeletingScope {
    fn apply(&self, builder: Builder, model: &dyn Model) -> Builder {
        builder.where_null(&model.qualify_column(&self.column))
    }

    fn extend(&self, builder: Builder) -> Builder {
        let column = self.column.clone();
        let hook_column = self.column.clone();
        let only_column = self.column.clone();

        builder
            .register_macro("with_trashed", |b: Builder, _: &[Value]| {
                Ok(b.without_global_scope(Self::IDENTIFIER))
            })
            .register_macro("without_trashed", move |b: Builder, _: &[Value]| {
                let qualified = b.model().qualify_column(&column);
                Ok(b.without_global_scope(Self::IDENTIFIER).where_null(&qualified))
            })
            .register_macro("only_trashed", move |b: Builder, _: &[Value]| {
                let qualified = b.model().qualify_column(&only_column);
                Ok(b.without_global_scope(Self::IDENTIFIER).where_not_null(&qualified))
            })
            .on_delete(move |b: Builder| {
                let mut values = Row::new();
                values.insert(hook_column.clone(), fresh_timestamp());
                Box::pin(async move { b.update(values).await })
            })
    }
}
