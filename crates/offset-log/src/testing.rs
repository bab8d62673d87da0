//! Wire encoders for building `__consumer_offsets` fixtures in tests.
//!
//! These write the same layouts the broker does, so decoder, ingestion and
//! end-to-end tests can inject realistic records without a cluster.

use bytes::BufMut;

use crate::group_metadata::{GroupMember, GroupMetadata};
use crate::key::{KEY_SCHEMA_GROUP_METADATA, KEY_SCHEMA_OFFSET_COMMIT_V0};

/// Every field an offset commit value may carry across schemas 0 to 3.
#[derive(Debug, Clone, Default)]
pub struct OffsetCommitFields {
    pub offset: i64,
    pub leader_epoch: i32,
    pub metadata: Option<String>,
    pub commit_timestamp: i64,
    pub expire_timestamp: i64,
}

pub fn encode_commit_key(schema: i16, group: &str, topic: &str, partition: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_i16(schema);
    put_string(&mut buf, Some(group));
    put_string(&mut buf, Some(topic));
    buf.put_i32(partition);
    buf
}

pub fn encode_group_metadata_key(group: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_i16(KEY_SCHEMA_GROUP_METADATA);
    put_string(&mut buf, Some(group));
    buf
}

/// Encode an offset commit value with the layout of `schema`.
///
/// Fields the schema does not carry are ignored. Unknown schemas get only the
/// tag and the offset.
pub fn encode_offset_value(schema: i16, fields: &OffsetCommitFields) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_i16(schema);
    buf.put_i64(fields.offset);
    match schema {
        0 | 2 => {
            put_string(&mut buf, fields.metadata.as_deref());
            buf.put_i64(fields.commit_timestamp);
        }
        1 => {
            put_string(&mut buf, fields.metadata.as_deref());
            buf.put_i64(fields.commit_timestamp);
            buf.put_i64(fields.expire_timestamp);
        }
        3 => {
            buf.put_i32(fields.leader_epoch);
            put_string(&mut buf, fields.metadata.as_deref());
            buf.put_i64(fields.commit_timestamp);
        }
        _ => {}
    }
    buf
}

/// Shorthand for a schema 0 commit record: `(key, value)`.
pub fn commit_record(group: &str, topic: &str, partition: i32, offset: i64) -> (Vec<u8>, Vec<u8>) {
    let key = encode_commit_key(KEY_SCHEMA_OFFSET_COMMIT_V0, group, topic, partition);
    let value = encode_offset_value(
        0,
        &OffsetCommitFields {
            offset,
            ..Default::default()
        },
    );
    (key, value)
}

pub fn encode_group_metadata(schema: i16, metadata: &GroupMetadata) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_i16(schema);
    put_string(&mut buf, Some(&metadata.protocol_type));
    buf.put_i32(metadata.generation);
    put_string(&mut buf, metadata.protocol.as_deref());
    put_string(&mut buf, metadata.leader.as_deref());
    if schema >= 2 {
        buf.put_i64(metadata.current_state_timestamp.unwrap_or_default());
    }
    buf.put_i32(metadata.members.len() as i32);
    for member in &metadata.members {
        put_member(&mut buf, schema, member);
    }
    buf
}

fn put_member(buf: &mut Vec<u8>, schema: i16, member: &GroupMember) {
    put_string(buf, Some(&member.member_id));
    if schema == 3 {
        put_string(buf, member.group_instance_id.as_deref());
    }
    put_string(buf, Some(&member.client_id));
    put_string(buf, Some(&member.client_host));
    if schema >= 1 {
        buf.put_i32(member.rebalance_timeout.unwrap_or_default());
    }
    buf.put_i32(member.session_timeout);
    // subscription, assignment
    buf.put_i32(0);
    buf.put_i32(0);
}

fn put_string(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(s) => {
            buf.put_i16(s.len() as i16);
            buf.put_slice(s.as_bytes());
        }
        None => buf.put_i16(-1),
    }
}
