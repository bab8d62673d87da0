//! Keys of the `__consumer_offsets` topic.

use crate::error::Result;
use crate::reader::Reader;
use crate::SchemaVersion;

pub const KEY_SCHEMA_OFFSET_COMMIT_V0: i16 = 0;
pub const KEY_SCHEMA_OFFSET_COMMIT_V1: i16 = 1;
pub const KEY_SCHEMA_GROUP_METADATA: i16 = 2;

/// Identifies the group, topic and partition an offset commit belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitKey {
    pub group: String,
    pub topic: String,
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupMetadataKey {
    pub group: String,
}

/// Decoded record key.
///
/// Only [`KeyRecord::Commit`] carries consumer offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRecord {
    Commit(CommitKey),
    GroupMetadata(GroupMetadataKey),
    /// A key schema this decoder does not know. Not an error; such records are skipped.
    Unrecognized { schema: SchemaVersion },
}

/// Decode a record key.
///
/// Fails only when the bytes are too short or malformed for the layout the
/// schema tag announces.
pub fn decode_key(bytes: &[u8]) -> Result<KeyRecord> {
    let mut reader = Reader::new(bytes);
    let schema = reader.read_i16()?;

    match schema {
        KEY_SCHEMA_OFFSET_COMMIT_V0 | KEY_SCHEMA_OFFSET_COMMIT_V1 => {
            let group = reader.read_string()?;
            let topic = reader.read_string()?;
            let partition = reader.read_i32()?;
            Ok(KeyRecord::Commit(CommitKey {
                group,
                topic,
                partition,
            }))
        }
        KEY_SCHEMA_GROUP_METADATA => {
            let group = reader.read_string()?;
            Ok(KeyRecord::GroupMetadata(GroupMetadataKey { group }))
        }
        other => Ok(KeyRecord::Unrecognized {
            schema: SchemaVersion(other),
        }),
    }
}
