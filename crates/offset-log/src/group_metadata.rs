//! Group metadata values (keys with schema 2).
//!
//! ```text
//! v0/v1: protocol_type, generation, protocol, leader, members[]
//! v2/v3: protocol_type, generation, protocol, leader, current_state_timestamp, members[]
//!
//! member v0: member_id, client_id, client_host, session_timeout, subscription, assignment
//! member v1: member_id, client_id, client_host, rebalance_timeout, session_timeout, subscription, assignment
//! member v2: same as v1
//! member v3: member_id, group_instance_id, client_id, client_host, rebalance_timeout,
//!            session_timeout, subscription, assignment
//! ```

use crate::error::{DecodeError, Result};
use crate::reader::Reader;
use crate::SchemaVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    pub protocol_type: String,
    pub generation: i32,
    pub protocol: Option<String>,
    pub leader: Option<String>,
    pub current_state_timestamp: Option<i64>,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub client_id: String,
    pub client_host: String,
    pub rebalance_timeout: Option<i32>,
    pub session_timeout: i32,
}

/// Decode a group metadata value.
///
/// `None` input is a group tombstone and yields `Ok(None)`. Member
/// subscription and assignment blobs are skipped.
pub fn decode_group_metadata(bytes: Option<&[u8]>) -> Result<Option<GroupMetadata>> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };

    let mut reader = Reader::new(bytes);
    let schema = reader.read_i16()?;
    if !(0..=3).contains(&schema) {
        return Err(DecodeError::UnknownGroupMetadataSchema(SchemaVersion(schema)));
    }

    let protocol_type = reader.read_string()?;
    let generation = reader.read_i32()?;
    let protocol = reader.read_nullable_string()?;
    let leader = reader.read_nullable_string()?;
    let current_state_timestamp = if schema >= 2 {
        Some(reader.read_i64()?)
    } else {
        None
    };

    let count = reader.read_array_len()?;
    let mut members = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        members.push(read_member(&mut reader, schema)?);
    }

    Ok(Some(GroupMetadata {
        protocol_type,
        generation,
        protocol,
        leader,
        current_state_timestamp,
        members,
    }))
}

fn read_member(reader: &mut Reader<'_>, schema: i16) -> Result<GroupMember> {
    let member_id = reader.read_string()?;
    let group_instance_id = if schema == 3 {
        reader.read_nullable_string()?
    } else {
        None
    };
    let client_id = reader.read_string()?;
    let client_host = reader.read_string()?;
    let rebalance_timeout = if schema >= 1 {
        Some(reader.read_i32()?)
    } else {
        None
    };
    let session_timeout = reader.read_i32()?;
    reader.read_bytes()?; // subscription
    reader.read_bytes()?; // assignment

    Ok(GroupMember {
        member_id,
        group_instance_id,
        client_id,
        client_host,
        rebalance_timeout,
        session_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::encode_group_metadata;

    fn sample(schema: i16) -> GroupMetadata {
        GroupMetadata {
            protocol_type: "consumer".to_string(),
            generation: 12,
            protocol: Some("range".to_string()),
            leader: Some("member-a".to_string()),
            current_state_timestamp: (schema >= 2).then_some(1_700_000_000_000),
            members: vec![GroupMember {
                member_id: "member-a".to_string(),
                group_instance_id: (schema == 3).then(|| "instance-1".to_string()),
                client_id: "billing-service".to_string(),
                client_host: "/10.0.0.12".to_string(),
                rebalance_timeout: (schema >= 1).then_some(300_000),
                session_timeout: 10_000,
            }],
        }
    }

    #[test]
    fn decodes_every_known_schema() {
        for schema in 0..=3 {
            let expected = sample(schema);
            let bytes = encode_group_metadata(schema, &expected);
            let decoded = decode_group_metadata(Some(&bytes)).unwrap();
            assert_eq!(decoded, Some(expected), "schema {schema}");
        }
    }

    #[test]
    fn empty_group_has_no_leader_or_members() {
        let metadata = GroupMetadata {
            protocol_type: "consumer".to_string(),
            generation: 3,
            protocol: None,
            leader: None,
            current_state_timestamp: Some(0),
            members: Vec::new(),
        };
        let bytes = encode_group_metadata(2, &metadata);
        assert_eq!(decode_group_metadata(Some(&bytes)).unwrap(), Some(metadata));
    }

    #[test]
    fn tombstone_is_none() {
        assert_eq!(decode_group_metadata(None).unwrap(), None);
    }

    #[test]
    fn unknown_schema_fails() {
        let bytes = 7i16.to_be_bytes();
        assert_eq!(
            decode_group_metadata(Some(&bytes)).unwrap_err(),
            DecodeError::UnknownGroupMetadataSchema(SchemaVersion(7))
        );
    }
}
