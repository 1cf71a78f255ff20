//! # relorm: relational ORM core
//!
//! Models describe tables and their relations; a model-aware [`Builder`]
//! queries them, hydrates [`Record`]s and eager loads relations with one query
//! per relation path. Many-to-many links are managed through
//! [`BelongsToMany`] (attach, detach, sync, toggle).
//!
//! ```no_run
//! use std::sync::Arc;
//! use relorm::{
//!     Builder, ConnectionRef, DatabaseConfig, Model, PostgresConnection, Record, Relation,
//! };
//!
//! #[derive(Debug)]
//! struct User;
//! #[derive(Debug)]
//! struct Post;
//!
//! impl Model for User {
//!     fn table_name(&self) -> &str { "users" }
//!     fn model_name(&self) -> &str { "User" }
//!     fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
//!         match name {
//!             "posts" => Some(parent.has_many(Post, "user_id", "id").into()),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! impl Model for Post {
//!     fn table_name(&self) -> &str { "posts" }
//!     fn model_name(&self) -> &str { "Post" }
//! }
//!
//! # async fn run() -> relorm::OrmResult<()> {
//! let config = DatabaseConfig::from_env()?;
//! let connection: ConnectionRef = Arc::new(PostgresConnection::connect(&config).await?);
//! let users = Builder::new(Arc::new(User), Some(connection)).with(["posts"]).get().await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod builder;
pub mod collection;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod relationships;
pub mod security;

pub use backends::{Connection, ConnectionRef, MemoryConnection, PostgresConnection};
pub use builder::{BoxFuture, Builder, DeleteHook, EagerConstraint, EagerLoad, Macro};
pub use collection::{Collection, Key};
pub use config::DatabaseConfig;
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use model::{
    closure_scope, fresh_timestamp, AliasedModel, ClosureScope, LocalScope, Model, ModelExt,
    ModelRef, Record, Related, Scope, SoftDeletingScope,
};
pub use query::{Connective, OrderDirection, QueryBuilder, QueryOperator, Row};
pub use relationships::{
    BelongsTo, BelongsToMany, HasManyThrough, HasOneOrMany, Pivot, PivotIds, Relation, SyncChanges,
};
