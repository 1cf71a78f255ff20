//! Error types for the ORM system
//!
//! The core only introduces its own kinds for lookups that found nothing and for
//! usage mistakes; database failures travel through unchanged as `Database`.

use serde_json::Value;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Database connection or query error, propagated from the driver
    #[error("Database error: {0}")]
    Database(String),

    /// `*_or_fail` lookups that matched nothing
    #[error("No query results for model [{model}]{}", format_ids(.ids))]
    NotFound { model: String, ids: Vec<Value> },

    /// A relation name the model does not declare
    #[error("Call to undefined relationship [{relation}] on model [{model}]")]
    RelationNotFound { model: String, relation: String },

    /// `Builder::call` with a name that is neither a macro, a scope nor a delegated method
    #[error("Call to undefined method [{method}] on builder for model [{model}]")]
    BadMethodCall { model: String, method: String },

    /// Arguments that cannot be used for the requested operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Primary key is missing or invalid
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    /// Query building or evaluation error
    #[error("Query error: {0}")]
    Query(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection pool error, or no connection bound
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Identifier validation failed
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ModelError {
    /// Not-found error for a model without specific ids
    pub fn not_found(model: &str) -> Self {
        ModelError::NotFound {
            model: model.to_string(),
            ids: Vec::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound { .. })
    }
}

fn format_ids(ids: &[Value]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = ids
        .iter()
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    format!(" {}", rendered.join(", "))
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ModelError::Connection(err.to_string())
            }
            other => ModelError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_found_message_lists_ids() {
        let err = ModelError::NotFound {
            model: "User".to_string(),
            ids: vec![json!(7), json!("abc")],
        };
        assert_eq!(err.to_string(), "No query results for model [User] 7, abc");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_not_found_without_ids() {
        let err = ModelError::not_found("Post");
        assert_eq!(err.to_string(), "No query results for model [Post]");
    }

    #[test]
    fn test_relation_not_found_message() {
        let err = ModelError::RelationNotFound {
            model: "User".to_string(),
            relation: "likes".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Call to undefined relationship [likes] on model [User]"
        );
    }
}
