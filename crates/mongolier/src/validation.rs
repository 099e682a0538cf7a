//! Name and filter validation
//!
//! Database and collection names are checked when a connection descriptor is
//! built, so a malformed descriptor fails at construction instead of on the
//! first query. Field names and filters coming from HTTP query strings are
//! checked before they reach the driver.

use bson::{Bson, Document};
use mongolier_common::{MongolierError, Result};
use tracing::warn;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// MongoDB limit on database name length
const MAX_DATABASE_NAME_LENGTH: usize = 63;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Characters MongoDB rejects in database names
const DATABASE_NAME_FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// Operators that execute server-side JavaScript
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Validated collection name
///
/// - Not empty
/// - At most 120 characters
/// - No null bytes or `$`
/// - No `system.` prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(MongolierError::Configuration(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(MongolierError::Configuration(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }
        if name.contains('\0') {
            return Err(MongolierError::Configuration(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }
        if name.starts_with("system.") {
            return Err(MongolierError::Configuration(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }
        if name.contains('$') {
            return Err(MongolierError::Configuration(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }
        if name.contains("..") {
            warn!(collection = name, "Collection name contains '..'");
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated database name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseName(String);

impl DatabaseName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(MongolierError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_DATABASE_NAME_LENGTH {
            return Err(MongolierError::Configuration(format!(
                "Database name exceeds maximum length of {} characters: '{}'",
                MAX_DATABASE_NAME_LENGTH, name
            )));
        }
        if let Some(c) = name.chars().find(|c| DATABASE_NAME_FORBIDDEN.contains(c)) {
            return Err(MongolierError::Configuration(format!(
                "Database name cannot contain {:?}: '{}'",
                c, name
            )));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks a field name taken from untrusted input (query string keys,
/// ordering parameters). Operators are never allowed here.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MongolierError::Validation(
            "Field name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_FIELD_NAME_LENGTH {
        return Err(MongolierError::Validation(format!(
            "Field name exceeds maximum length of {} characters",
            MAX_FIELD_NAME_LENGTH
        )));
    }
    if name.contains('\0') {
        return Err(MongolierError::Validation(
            "Field name cannot contain null bytes".to_string(),
        ));
    }
    if name.starts_with('$') {
        return Err(MongolierError::Validation(format!(
            "Field name cannot start with '$' (reserved for operators): '{}'",
            name
        )));
    }
    Ok(())
}

/// Rejects filters that would run server-side JavaScript. Everything else is
/// left to the driver.
pub fn validate_filter(filter: &Document) -> Result<()> {
    for (key, value) in filter {
        if DANGEROUS_OPERATORS.contains(&key.as_str()) {
            warn!(operator = %key, "Rejected filter operator");
            return Err(MongolierError::Validation(format!(
                "Operator '{}' is not allowed",
                key
            )));
        }
        validate_filter_value(value)?;
    }
    Ok(())
}

fn validate_filter_value(value: &Bson) -> Result<()> {
    match value {
        Bson::Document(doc) => validate_filter(doc),
        Bson::Array(items) => items.iter().try_for_each(validate_filter_value),
        _ => Ok(()),
    }
}
