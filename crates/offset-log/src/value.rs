//! Offset commit values.

use crate::error::{DecodeError, Result};
use crate::reader::Reader;
use crate::SchemaVersion;

/// Newest value schema this decoder understands.
pub const MAX_VALUE_SCHEMA: i16 = 3;

/// The committed position of a consumer group on one partition.
///
/// Commit metadata, timestamps and leader epoch are read to keep the cursor
/// aligned but not retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetValue {
    pub offset: i64,
}

/// Decode an offset commit value.
///
/// `None` input is a tombstone and yields `Ok(None)`.
pub fn decode_value(bytes: Option<&[u8]>) -> Result<Option<OffsetValue>> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };

    let mut reader = Reader::new(bytes);
    let schema = reader.read_i16()?;

    let offset = match schema {
        0 => {
            let offset = reader.read_i64()?;
            reader.skip_string()?; // metadata
            reader.read_i64()?; // timestamp
            offset
        }
        1 => {
            let offset = reader.read_i64()?;
            reader.skip_string()?; // metadata
            reader.read_i64()?; // commit timestamp
            reader.read_i64()?; // expire timestamp
            offset
        }
        2 => {
            let offset = reader.read_i64()?;
            reader.skip_string()?; // metadata
            reader.read_i64()?; // commit timestamp
            offset
        }
        3 => {
            let offset = reader.read_i64()?;
            reader.read_i32()?; // leader epoch
            reader.skip_string()?; // metadata
            reader.read_i64()?; // commit timestamp
            offset
        }
        other => return Err(DecodeError::UnknownValueSchema(SchemaVersion(other))),
    };

    Ok(Some(OffsetValue { offset }))
}
