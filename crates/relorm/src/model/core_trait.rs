//! Core Model Trait - Base definition for database entities
//!
//! A model is a description of a table: its name, primary key, timestamp
//! behaviour, scopes and relationship graph. Rows themselves live in
//! [`Record`](super::Record). The trait is object safe so that relations can
//! point at arbitrary related models through a [`ModelRef`].

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use super::record::Record;
use super::scope::Scope;
use crate::backends::ConnectionRef;
use crate::builder::Builder;
use crate::error::OrmResult;
use crate::relationships::Relation;

/// Shared handle to a model description
pub type ModelRef = Arc<dyn Model>;

/// A model-defined local scope, callable through [`Builder::scope`] and [`Builder::call`]
pub type LocalScope = fn(Builder, &[Value]) -> OrmResult<Builder>;

/// Core trait for database models
pub trait Model: Send + Sync + Debug + 'static {
    /// Table name for this model
    fn table_name(&self) -> &str;

    /// Name used in error messages, e.g. `User`
    fn model_name(&self) -> &str;

    /// Primary key field name
    fn primary_key_name(&self) -> &str {
        "id"
    }

    /// Check if this model maintains `created_at` / `updated_at`
    fn uses_timestamps(&self) -> bool {
        false
    }

    fn created_at_column(&self) -> &str {
        "created_at"
    }

    fn updated_at_column(&self) -> &str {
        "updated_at"
    }

    /// Prefix an unqualified column with this model's table
    fn qualify_column(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table_name(), column)
        }
    }

    /// `user_id` for a `User` keyed by `id`
    fn default_foreign_key(&self) -> String {
        format!("{}_{}", snake_case(self.model_name()), self.primary_key_name())
    }

    /// Constraints applied to every query for this model, keyed by identifier
    fn global_scopes(&self) -> Vec<(String, Arc<dyn Scope>)> {
        Vec::new()
    }

    /// Look up a local scope by name
    fn local_scope(&self, _name: &str) -> Option<LocalScope> {
        None
    }

    /// Declare the relation called `name` for `parent`.
    ///
    /// Implementations return the relation without constraints; callers add
    /// either the single-parent or the eager constraints themselves.
    fn relation(&self, _parent: &Record, _name: &str) -> Option<Relation> {
        None
    }
}

/// Convenience constructors for concrete model types
pub trait ModelExt: Model + Sized {
    /// Start a query for this model
    fn query(self, connection: ConnectionRef) -> Builder {
        Builder::new(Arc::new(self), Some(connection))
    }

    /// A new, unsaved record of this model
    fn make(self) -> Record {
        Record::new(Arc::new(self))
    }
}

impl<M: Model> ModelExt for M {}

/// A model read under a table alias, e.g. `categories as relorm_reserved_1`.
///
/// Columns qualify against the alias; everything else comes from the wrapped model.
#[derive(Debug, Clone)]
pub struct AliasedModel {
    inner: ModelRef,
    alias: String,
}

impl AliasedModel {
    pub fn new(inner: ModelRef, alias: &str) -> Self {
        Self {
            inner,
            alias: alias.to_string(),
        }
    }

    pub fn inner(&self) -> &ModelRef {
        &self.inner
    }
}

impl Model for AliasedModel {
    fn table_name(&self) -> &str {
        &self.alias
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn primary_key_name(&self) -> &str {
        self.inner.primary_key_name()
    }

    fn uses_timestamps(&self) -> bool {
        self.inner.uses_timestamps()
    }

    fn created_at_column(&self) -> &str {
        self.inner.created_at_column()
    }

    fn updated_at_column(&self) -> &str {
        self.inner.updated_at_column()
    }

    fn global_scopes(&self) -> Vec<(String, Arc<dyn Scope>)> {
        self.inner.global_scopes()
    }

    fn local_scope(&self, name: &str) -> Option<LocalScope> {
        self.inner.local_scope(name)
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        self.inner.relation(parent, name)
    }
}

/// Timestamp written to `created_at` / `updated_at` / `deleted_at` columns
pub fn fresh_timestamp() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
