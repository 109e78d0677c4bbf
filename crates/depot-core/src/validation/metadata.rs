//! Custom metadata validation
//!
//! Keys are limited to letters, digits, underscore, hyphen and dot, may not use
//! a reserved prefix, and values are bounded by their serialized length.

use regex::Regex;

use crate::error::AppError;
use crate::models::CustomMetadata;

pub const MAX_METADATA_KEY_LENGTH: usize = 64;

/// Measured on the JSON serialization of the value.
pub const MAX_METADATA_VALUE_LENGTH: usize = 1024;

pub const MAX_CUSTOM_METADATA_KEYS: usize = 50;

const RESERVED_PREFIXES: &[&str] = &["_system_", "_internal_", "depot."];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

pub fn validate_metadata_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(AppError::validation("Metadata key cannot be empty"));
    }

    if key.len() > MAX_METADATA_KEY_LENGTH {
        return Err(AppError::validation(format!(
            "Metadata key '{}' exceeds maximum length of {} characters",
            key, MAX_METADATA_KEY_LENGTH
        )));
    }

    let pattern = Regex::new(r"^[A-Za-z0-9_.\-]+$").map_err(|e| {
        AppError::Internal(format!("Failed to compile metadata key pattern: {}", e))
    })?;

    if !pattern.is_match(key) {
        return Err(AppError::validation(format!(
            "Metadata key '{}' contains invalid characters. Allowed: letters, digits, underscore (_), hyphen (-), dot (.)",
            key
        )));
    }

    if is_reserved_key(key) {
        return Err(AppError::validation(format!(
            "Metadata key '{}' uses a reserved prefix. Reserved prefixes: {:?}",
            key, RESERVED_PREFIXES
        )));
    }

    Ok(())
}

pub fn validate_metadata_value(value: &serde_json::Value) -> Result<(), AppError> {
    let serialized = serde_json::to_string(value)?;
    if serialized.chars().count() > MAX_METADATA_VALUE_LENGTH {
        return Err(AppError::validation(format!(
            "Metadata value exceeds maximum length of {} characters when serialized",
            MAX_METADATA_VALUE_LENGTH
        )));
    }
    Ok(())
}

/// Validate a full custom map, as it would look after a merge.
pub fn validate_custom_metadata(custom: &CustomMetadata) -> Result<(), AppError> {
    if custom.len() > MAX_CUSTOM_METADATA_KEYS {
        return Err(AppError::validation(format!(
            "Custom metadata contains {} keys, but maximum allowed is {}",
            custom.len(),
            MAX_CUSTOM_METADATA_KEYS
        )));
    }

    for (key, value) in custom {
        validate_metadata_key(key)?;
        validate_metadata_value(value).map_err(|e| {
            AppError::validation(format!("Invalid metadata value for key '{}': {}", key, e))
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_metadata_key_valid() {
        assert!(validate_metadata_key("projectId").is_ok());
        assert!(validate_metadata_key("project_id").is_ok());
        assert!(validate_metadata_key("project-id").is_ok());
        assert!(validate_metadata_key("project.id").is_ok());
        assert!(validate_metadata_key("Q3").is_ok());
    }

    #[test]
    fn test_validate_metadata_key_invalid() {
        assert!(validate_metadata_key("").is_err());
        assert!(validate_metadata_key("has space").is_err());
        assert!(validate_metadata_key("a:b").is_err());
        assert!(validate_metadata_key("a/b").is_err());
        assert!(validate_metadata_key(&"k".repeat(MAX_METADATA_KEY_LENGTH + 1)).is_err());
        assert!(validate_metadata_key(&"k".repeat(MAX_METADATA_KEY_LENGTH)).is_ok());
    }

    #[test]
    fn test_reserved_prefixes() {
        assert!(is_reserved_key("_system_owner"));
        assert!(is_reserved_key("depot.folder"));
        assert!(!is_reserved_key("system"));
        assert!(matches!(
            validate_metadata_key("_internal_x"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_value_length() {
        // Serialized string includes the two quotes.
        let ok = json!("v".repeat(MAX_METADATA_VALUE_LENGTH - 2));
        assert!(validate_metadata_value(&ok).is_ok());
        let too_long = json!("v".repeat(MAX_METADATA_VALUE_LENGTH));
        assert!(validate_metadata_value(&too_long).is_err());
    }

    #[test]
    fn test_key_count_limit() {
        let mut custom = CustomMetadata::new();
        for i in 0..MAX_CUSTOM_METADATA_KEYS {
            custom.insert(format!("key{}", i), json!(i));
        }
        assert!(validate_custom_metadata(&custom).is_ok());
        custom.insert("one_more".to_string(), json!(true));
        assert!(validate_custom_metadata(&custom).is_err());
    }
}
