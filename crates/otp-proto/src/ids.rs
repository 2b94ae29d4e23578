//! Identifier types shared by every OTP component.
//!
//! See the data model: `doId`, `channel`, and `uuId` are the three identifier
//! spaces the cluster hands around. They are deliberately kept as thin
//! newtypes over the primitive so field-pack code and bus routing can stay
//! copy-cheap.

use std::fmt;

/// Distributed-object identifier. Shared by ephemeral and persistent objects.
pub type DoId = u32;

/// Zone partition key. Siblings under the same `parentId` form an
/// independent visibility set.
pub type ZoneId = u32;

/// Message Director channel address.
pub type Channel = u64;

/// The zone reserved as the "quiet zone"; never admitted into an interest set.
pub const QUIET_ZONE: ZoneId = 1;

/// First doId handed out to a persistent (database-backed) object.
pub const FIRST_PERSISTENT_DOID: DoId = 10_000_000;

/// Added to a `doId` to form its puppet channel.
pub const PUPPET_CHANNEL_OFFSET: Channel = 1 << 32;

/// Fixed service channel the Database Server listens on.
pub const DBSERVER_CHANNEL: Channel = 4003;

/// Fixed service channel the State Server listens on.
pub const STATESERVER_CHANNEL: Channel = 20_100_000;

/// Fixed channel used to rewrite the sender of chat field updates so the
/// originating client does not suppress its own echo.
pub const CHAT_REWRITE_CHANNEL: Channel = 4681;

/// Returns the puppet channel for a `doId`.
#[inline]
pub const fn puppet_channel(do_id: DoId) -> Channel {
    do_id as Channel + PUPPET_CHANNEL_OFFSET
}

/// Returns the "block origin" zone for a zone id (`zoneId - zoneId % 100`).
#[inline]
pub const fn block_origin(zone_id: ZoneId) -> ZoneId {
    zone_id - (zone_id % 100)
}

/// 128-bit identifier minted once at persistent-object creation time.
///
/// Derived as `md5(className || doId || creationTimestamp)`, reinterpreted
/// as a version-4 UUID (per spec). Never reused for the lifetime of the
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UuId(pub uuid::Uuid);

impl UuId {
    /// Mint a new uuId for a freshly created persistent object.
    pub fn mint(class_name: &str, do_id: DoId, creation_timestamp: i64) -> Self {
        let mut input = Vec::with_capacity(class_name.len() + 4 + 8);
        input.extend_from_slice(class_name.as_bytes());
        input.extend_from_slice(&do_id.to_le_bytes());
        input.extend_from_slice(&creation_timestamp.to_le_bytes());
        let digest = md5::compute(&input);
        let mut bytes: [u8; 16] = digest.0;
        // Reinterpret as a version-4, variant-1 UUID, the same way a random
        // v4 UUID's bytes are tagged, so the result round-trips through any
        // UUID-typed column or log field.
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        UuId(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for UuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UuId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UuId(uuid::Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn puppet_channel_offsets_by_2_32() {
        assert_eq!(puppet_channel(1), 1 + (1u64 << 32));
    }

    #[test]
    fn block_origin_rounds_down_to_hundred() {
        assert_eq!(block_origin(2142), 2100);
        assert_eq!(block_origin(2100), 2100);
        assert_eq!(block_origin(99), 0);
    }

    #[test]
    fn uuid_mint_is_stable_and_v4_tagged() {
        let a = UuId::mint("DistributedToon", 10_000_001, 1_700_000_000);
        let b = UuId::mint("DistributedToon", 10_000_001, 1_700_000_000);
        assert_eq!(a, b);
        assert_eq!(a.0.get_version_num(), 4);

        let c = UuId::mint("DistributedToon", 10_000_002, 1_700_000_000);
        assert_ne!(a, c);
    }
}
