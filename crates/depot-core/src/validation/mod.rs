//! Validation modules

pub mod metadata;
pub mod upload;

pub use metadata::{
    is_reserved_key, validate_custom_metadata, validate_metadata_key, validate_metadata_value,
    MAX_CUSTOM_METADATA_KEYS, MAX_METADATA_KEY_LENGTH, MAX_METADATA_VALUE_LENGTH,
};
pub use upload::{parse_tags, UploadOptions, UploadOptionsInput};
