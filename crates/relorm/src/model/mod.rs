//! Model System - table descriptions, hydrated records and scopes
//!
//! - `core_trait`: the object-safe [`Model`] trait
//! - `record`: [`Record`], one hydrated row with its relation cache
//! - `scope`: global scopes, including soft deletes

pub mod core_trait;
pub mod record;
pub mod scope;

pub use core_trait::{fresh_timestamp, AliasedModel, LocalScope, Model, ModelExt, ModelRef};
pub use record::{Record, Related};
pub use scope::{closure_scope, ClosureScope, Scope, SoftDeletingScope};
