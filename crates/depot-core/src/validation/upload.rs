//! Upload-time options as they arrive from a form: raw text fields parsed into
//! typed values. Malformed input is a `ValidationError`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::EntityType;

/// Raw text fields accompanying an upload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptionsInput {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub is_public: Option<String>,
    pub tags: Option<String>,
    pub expires_at: Option<String>,
    pub enable_compression: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub is_public: bool,
    pub tags: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub enable_compression: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            entity_type: EntityType::Other,
            entity_id: None,
            is_public: false,
            tags: BTreeSet::new(),
            expires_at: None,
            enable_compression: true,
        }
    }
}

fn parse_flag(field: &str, raw: Option<&str>, default: bool) -> Result<bool, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(AppError::validation(format!(
            "{} must be true or false, got '{}'",
            field, other
        ))),
    }
}

/// Comma delimited, trimmed, lower-cased; empty entries dropped.
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

impl UploadOptions {
    pub fn parse(input: &UploadOptionsInput, now: DateTime<Utc>) -> Result<Self, AppError> {
        let entity_type = match input.entity_type.as_deref().map(str::trim) {
            None | Some("") => EntityType::Other,
            Some(raw) => raw
                .parse::<EntityType>()
                .map_err(|e| AppError::validation(e.to_string()))?,
        };

        let entity_id = input
            .entity_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let expires_at = match input.expires_at.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let at = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        AppError::validation(format!(
                            "expiresAt must be an RFC 3339 timestamp: {}",
                            e
                        ))
                    })?
                    .with_timezone(&Utc);
                if at <= now {
                    return Err(AppError::validation("expiresAt must be in the future"));
                }
                Some(at)
            }
        };

        Ok(UploadOptions {
            entity_type,
            entity_id,
            is_public: parse_flag("isPublic", input.is_public.as_deref(), false)?,
            tags: input.tags.as_deref().map(parse_tags).unwrap_or_default(),
            expires_at,
            enable_compression: parse_flag(
                "enableCompression",
                input.enable_compression.as_deref(),
                true,
            )?,
        })
    }
}
