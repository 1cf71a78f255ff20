//! Security utilities for SQL injection prevention
//!
//! Identifiers coming from models and relation definitions are quoted before they
//! reach generated SQL; values always travel as bound parameters.

use crate::error::ModelError;

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// Escape a SQL identifier (table name, column name, etc.)
///
/// Existing double quotes are doubled and the result is wrapped in double quotes.
///
/// ```
/// use relorm::security::escape_identifier;
///
/// assert_eq!(escape_identifier("user_table"), "\"user_table\"");
/// assert_eq!(escape_identifier("table\"name"), "\"table\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a possibly qualified reference such as `posts.user_id`,
/// `posts.*` or `role_user.role_id as pivot_role_id`
pub fn quote_reference(reference: &str) -> String {
    let reference = reference.trim();
    if let Some((target, alias)) = split_alias(reference) {
        return format!("{} AS {}", quote_reference(target), escape_identifier(alias));
    }

    reference
        .split('.')
        .map(|segment| {
            if segment == "*" {
                segment.to_string()
            } else {
                escape_identifier(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Split `target as alias` (case insensitive) into its two halves
pub fn split_alias(reference: &str) -> Option<(&str, &str)> {
    let lower = reference.to_ascii_lowercase();
    let position = lower.find(" as ")?;
    let target = reference[..position].trim();
    let alias = reference[position + 4..].trim();
    if target.is_empty() || alias.is_empty() {
        None
    } else {
        Some((target, alias))
    }
}

/// Whether `reference` is a plain column or table reference that can be quoted,
/// as opposed to a raw expression like `COUNT(*)` or `lower(name)`
pub fn is_plain_reference(reference: &str) -> bool {
    let reference = reference.trim();
    let (target, alias) = match split_alias(reference) {
        Some((target, alias)) => (target, Some(alias)),
        None => (reference, None),
    };
    let segments_ok = target
        .split('.')
        .all(|segment| segment == "*" || validate_identifier(segment).is_ok());
    segments_ok && alias.map_or(true, |alias| validate_identifier(alias).is_ok())
}

/// Validate that an identifier is safe for use in SQL
pub fn validate_identifier(identifier: &str) -> Result<(), ModelError> {
    let Some(first) = identifier.chars().next() else {
        return Err(ModelError::Validation(
            "Identifier cannot be empty".to_string(),
        ));
    };

    // PostgreSQL truncates past 63 bytes
    if identifier.len() > 63 {
        return Err(ModelError::Validation(format!(
            "Identifier '{}' is too long (max 63 characters)",
            identifier
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(ModelError::Validation(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(ModelError::Validation(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    Ok(())
}

/// Validate a table reference, which may carry a `as alias` suffix
pub fn validate_table_reference(reference: &str) -> Result<(), ModelError> {
    match split_alias(reference) {
        Some((table, alias)) => {
            validate_identifier(table)?;
            validate_identifier(alias)
        }
        None => validate_identifier(reference.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("user_table"), "\"user_table\"");
        assert_eq!(escape_identifier("table\"name"), "\"table\"\"name\"");
    }

    #[test]
    fn test_quote_reference() {
        assert_eq!(quote_reference("posts.user_id"), "\"posts\".\"user_id\"");
        assert_eq!(quote_reference("posts.*"), "\"posts\".*");
        assert_eq!(quote_reference("*"), "*");
        assert_eq!(
            quote_reference("role_user.role_id as pivot_role_id"),
            "\"role_user\".\"role_id\" AS \"pivot_role_id\""
        );
        assert_eq!(quote_reference("users AS u"), "\"users\" AS \"u\"");
    }

    #[test]
    fn test_is_plain_reference() {
        assert!(is_plain_reference("users.*"));
        assert!(is_plain_reference("posts.user_id as owner"));
        assert!(!is_plain_reference("COUNT(*)"));
        assert!(!is_plain_reference("lower(name)"));
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("user_table").is_ok());
        assert!(validate_identifier("_private").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("table-name").is_err());
        assert!(validate_identifier("table name").is_err());
    }

    #[test]
    fn test_validate_table_reference() {
        assert!(validate_table_reference("users").is_ok());
        assert!(validate_table_reference("users as author").is_ok());
        assert!(validate_table_reference("users; drop").is_err());
    }
}
