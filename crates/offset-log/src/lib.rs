//! Decoder for records of the Kafka `__consumer_offsets` topic.
//!
//! Every key and value in the topic starts with a big-endian `int16` schema
//! version. The version selects the layout of the remaining fields:
//!
//! ```text
//! key   v0/v1: group (string), topic (string), partition (int32)   -> offset commit
//! key   v2   : group (string)                                      -> group metadata
//! value v0   : offset (int64), metadata (string), timestamp (int64)
//! value v1   : offset (int64), metadata (string), commit_ts (int64), expire_ts (int64)
//! value v2   : offset (int64), metadata (string), commit_ts (int64)
//! value v3   : offset (int64), leader_epoch (int32), metadata (string), commit_ts (int64)
//! ```
//!
//! Keys with an unknown schema decode to [`KeyRecord::Unrecognized`]. Values with
//! an unknown schema are a hard [`DecodeError::UnknownValueSchema`], since they mean
//! the broker started writing a format this decoder does not understand.
//!
//! A missing value (`None`) is a tombstone and decodes to `Ok(None)`, which is
//! distinct from any decode failure.
//!
//! # Modules
//!
//! - [`key`] - commit and group-metadata keys
//! - [`value`] - offset commit values
//! - [`group_metadata`] - group metadata values (membership, generation)
//! - [`testing`] - wire encoders for building fixtures

mod error;
pub mod group_metadata;
pub mod key;
mod reader;
pub mod testing;
pub mod value;

use std::fmt;

pub use error::{DecodeError, Result};
pub use group_metadata::{decode_group_metadata, GroupMember, GroupMetadata};
pub use key::{decode_key, CommitKey, GroupMetadataKey, KeyRecord};
pub use value::{decode_value, OffsetValue};

/// Name of the internal topic the broker writes offset commits to.
pub const CONSUMER_OFFSETS_TOPIC: &str = "__consumer_offsets";

/// Leading `int16` of every encoded key and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub i16);

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
