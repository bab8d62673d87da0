//! Error types for offset-log decoding.

use thiserror::Error;

use crate::SchemaVersion;

/// Errors that can occur while decoding `__consumer_offsets` records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown offset value schema {0}")]
    UnknownValueSchema(SchemaVersion),

    #[error("Unknown group metadata value schema {0}")]
    UnknownGroupMetadataSchema(SchemaVersion),

    #[error("Record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Invalid length prefix {length} for {field}")]
    InvalidLength { field: &'static str, length: i32 },

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,
}

impl DecodeError {
    /// True when the record uses a value layout this decoder does not know.
    ///
    /// Callers alert on this separately from truncated or corrupt records.
    pub fn is_unknown_schema(&self) -> bool {
        matches!(
            self,
            DecodeError::UnknownValueSchema(_) | DecodeError::UnknownGroupMetadataSchema(_)
        )
    }
}

/// Result type alias for decode operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
