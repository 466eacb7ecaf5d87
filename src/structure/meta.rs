use std::time::{Duration, SystemTime};

use crate::util::serializable::{read_u16, read_u32, read_u64, ByteSerializable, KnownSize};

pub type UserId = u32;
pub type GroupId = u32;

const TIME_SIZE: usize = 12;

/// Ownership, permission and timestamp fields of an inode.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub permissions: u16,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub accessed_at: SystemTime,
    pub modified_at: SystemTime,
    pub changed_at: SystemTime,
}

impl Metadata {
    pub fn new(permissions: u16, user_id: UserId, group_id: GroupId) -> Metadata {
        let now = SystemTime::now();

        Metadata {
            permissions,
            user_id,
            group_id,
            accessed_at: now,
            modified_at: now,
            changed_at: now,
        }
    }

    pub fn touch_modified(&mut self) {
        let now = SystemTime::now();
        self.modified_at = now;
        self.changed_at = now;
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata::new(0, 0, 0)
    }
}

impl ByteSerializable for SystemTime {
    fn to_bytes(&self) -> Vec<u8> {
        // Times before the epoch are clamped to it.
        let since_unix = self.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
        let mut result = Vec::<u8>::with_capacity(TIME_SIZE);
        result.extend_from_slice(&since_unix.as_secs().to_le_bytes());
        result.extend_from_slice(&since_unix.subsec_nanos().to_le_bytes());
        result
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let nanos = read_u32(bytes, 8).min(999_999_999);
        SystemTime::UNIX_EPOCH + Duration::new(read_u64(bytes, 0), nanos)
    }
}

impl ByteSerializable for Metadata {
    fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::<u8>::with_capacity(Self::size_on_disk());
        result.extend_from_slice(&self.permissions.to_le_bytes());
        result.extend_from_slice(&self.user_id.to_le_bytes());
        result.extend_from_slice(&self.group_id.to_le_bytes());
        result.extend_from_slice(&self.accessed_at.to_bytes());
        result.extend_from_slice(&self.modified_at.to_bytes());
        result.extend_from_slice(&self.changed_at.to_bytes());
        result
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Metadata {
            permissions: read_u16(bytes, 0),
            user_id: read_u32(bytes, 2),
            group_id: read_u32(bytes, 6),
            accessed_at: SystemTime::from_bytes(&bytes[10..22]),
            modified_at: SystemTime::from_bytes(&bytes[22..34]),
            changed_at: SystemTime::from_bytes(&bytes[34..46]),
        }
    }
}

impl KnownSize for Metadata {
    fn size_on_disk() -> usize {
        2 + 4 + 4 + 3 * TIME_SIZE
    }
}
