//! Deep space packet structure and bit-exact wire codec
//!
//! Wire layout:
//!
//! ```text
//! packet_id(32) | source_id(32) | destination_id(32) | type(1) | priority(1)
//! | sequence(u32 BE) | payload_len(u32 BE) | timestamp(f64 BE)      = 114 B
//! route_count(1) | route_count x node_id(32)                  (max 10 hops)
//! checksum(64, null-padded SHA-256 hex digest)
//! payload(payload_len)
//! ```
//!
//! The checksum covers id/source/destination/type/priority/payload/sequence/
//! timestamp and deliberately excludes the route history: relays append
//! themselves hop by hop without invalidating integrity, and receivers
//! digest the same field set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fixed header length in bytes
pub const HEADER_LEN: usize = 114;
/// Node id field width on the wire
pub const NODE_ID_LEN: usize = 32;
/// Hex digest field width on the wire
pub const CHECKSUM_LEN: usize = 64;
/// Route history cap
pub const MAX_ROUTE_ENTRIES: usize = 10;

/// Packet decoding errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Frame truncated: {0} bytes")]
    Truncated(usize),
    #[error("Unknown packet type: {0:#04x}")]
    UnknownType(u8),
    #[error("Unknown priority: {0}")]
    UnknownPriority(u8),
}

/// Packet type tag (closed set, wire discriminants)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Data = 0x01,
    Ack = 0x02,
    Nack = 0x03,
    Heartbeat = 0x04,
    Emergency = 0x05,
    RoutingUpdate = 0x06,
    TimeSync = 0x07,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        match value {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::Ack),
            0x03 => Ok(PacketType::Nack),
            0x04 => Ok(PacketType::Heartbeat),
            0x05 => Ok(PacketType::Emergency),
            0x06 => Ok(PacketType::RoutingUpdate),
            0x07 => Ok(PacketType::TimeSync),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

/// Delivery priority (wire discriminants)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
    Emergency = 5,
}

impl TryFrom<u8> for Priority {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        match value {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::High),
            4 => Ok(Priority::Critical),
            5 => Ok(Priority::Emergency),
            other => Err(PacketError::UnknownPriority(other)),
        }
    }
}

/// A deep space transport packet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeepSpacePacket {
    pub packet_id: String,
    pub source_id: String,
    pub destination_id: String,
    pub packet_type: PacketType,
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub sequence_number: u32,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Maximum packet age in seconds before mandatory drop
    pub ttl: f64,
    /// Node ids traversed so far, grows one per hop
    pub route_history: Vec<String>,
    /// SHA-256 hex digest of the integrity field set
    pub checksum: String,
}

impl DeepSpacePacket {
    /// Create a packet with a freshly computed checksum and default TTL (24 h).
    pub fn new(
        packet_id: impl Into<String>,
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        packet_type: PacketType,
        priority: Priority,
        payload: Vec<u8>,
        sequence_number: u32,
        timestamp: f64,
    ) -> Self {
        let mut packet = Self {
            packet_id: packet_id.into(),
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            packet_type,
            priority,
            payload,
            sequence_number,
            timestamp,
            ttl: 86_400.0,
            route_history: Vec::new(),
            checksum: String::new(),
        };
        packet.checksum = packet.compute_checksum();
        packet
    }

    /// Digest over the integrity field set (route history excluded).
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.packet_id.as_bytes());
        hasher.update(self.source_id.as_bytes());
        hasher.update(self.destination_id.as_bytes());
        hasher.update([self.packet_type as u8]);
        hasher.update([self.priority as u8]);
        hasher.update(&self.payload);
        hasher.update(self.sequence_number.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify integrity against the carried checksum.
    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// True when the packet has outlived its TTL at `now` (epoch seconds).
    pub fn is_expired(&self, now: f64) -> bool {
        now - self.timestamp > self.ttl
    }

    /// Serialize to the wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let route_entries = self.route_history.len().min(MAX_ROUTE_ENTRIES);
        let mut out = Vec::with_capacity(
            HEADER_LEN + 1 + route_entries * NODE_ID_LEN + CHECKSUM_LEN + self.payload.len(),
        );

        out.extend_from_slice(&pad_field(&self.packet_id, NODE_ID_LEN));
        out.extend_from_slice(&pad_field(&self.source_id, NODE_ID_LEN));
        out.extend_from_slice(&pad_field(&self.destination_id, NODE_ID_LEN));
        out.push(self.packet_type as u8);
        out.push(self.priority as u8);
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());

        out.push(route_entries as u8);
        for node in self.route_history.iter().take(MAX_ROUTE_ENTRIES) {
            out.extend_from_slice(&pad_field(node, NODE_ID_LEN));
        }

        out.extend_from_slice(&pad_field(&self.checksum, CHECKSUM_LEN));
        out.extend_from_slice(&self.payload);
        out
    }

    /// Deserialize from the wire format.
    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN + 1 {
            return Err(PacketError::Truncated(data.len()));
        }

        let packet_id = unpad_field(&data[0..32]);
        let source_id = unpad_field(&data[32..64]);
        let destination_id = unpad_field(&data[64..96]);
        let packet_type = PacketType::try_from(data[96])?;
        let priority = Priority::try_from(data[97])?;
        let sequence_number = u32::from_be_bytes(data[98..102].try_into().expect("4 bytes"));
        let payload_length = u32::from_be_bytes(data[102..106].try_into().expect("4 bytes")) as usize;
        let timestamp = f64::from_be_bytes(data[106..114].try_into().expect("8 bytes"));

        let route_count = data[114] as usize;
        if route_count > MAX_ROUTE_ENTRIES {
            return Err(PacketError::Truncated(data.len()));
        }
        let checksum_start = 115 + route_count * NODE_ID_LEN;
        let payload_start = checksum_start + CHECKSUM_LEN;
        if data.len() < payload_start + payload_length {
            return Err(PacketError::Truncated(data.len()));
        }

        let mut route_history = Vec::with_capacity(route_count);
        for i in 0..route_count {
            let start = 115 + i * NODE_ID_LEN;
            let node = unpad_field(&data[start..start + NODE_ID_LEN]);
            if !node.is_empty() {
                route_history.push(node);
            }
        }

        let checksum = unpad_field(&data[checksum_start..payload_start]);
        let payload = data[payload_start..payload_start + payload_length].to_vec();

        Ok(Self {
            packet_id,
            source_id,
            destination_id,
            packet_type,
            priority,
            payload,
            sequence_number,
            timestamp,
            ttl: 86_400.0,
            route_history,
            checksum,
        })
    }
}

fn pad_field(value: &str, width: usize) -> Vec<u8> {
    let mut field = value.as_bytes()[..value.len().min(width)].to_vec();
    field.resize(width, 0);
    field
}

fn unpad_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_packet() -> DeepSpacePacket {
        let mut packet = DeepSpacePacket::new(
            "sat-1_0_1700000000",
            "sat-1",
            "gs-madrid",
            PacketType::Data,
            Priority::Normal,
            b"telemetry frame".to_vec(),
            7,
            1_700_000_000.25,
        );
        packet.route_history = vec!["sat-1".to_string(), "sat-2".to_string()];
        packet
    }

    #[test]
    fn test_wire_roundtrip() {
        let packet = sample_packet();
        let wire = packet.serialize();
        let decoded = DeepSpacePacket::deserialize(&wire).unwrap();

        assert_eq!(decoded, packet);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_header_layout_is_fixed() {
        let packet = sample_packet();
        let wire = packet.serialize();

        assert_eq!(&wire[0..6], b"sat-1_");
        assert_eq!(wire[96], PacketType::Data as u8);
        assert_eq!(wire[97], Priority::Normal as u8);
        assert_eq!(&wire[98..102], &7u32.to_be_bytes());
        assert_eq!(wire[114], 2); // route count
        assert_eq!(
            wire.len(),
            HEADER_LEN + 1 + 2 * NODE_ID_LEN + CHECKSUM_LEN + packet.payload.len()
        );
    }

    #[test]
    fn test_route_history_does_not_affect_checksum() {
        let mut packet = sample_packet();
        let original = packet.checksum.clone();
        packet.route_history.push("relay-9".to_string());

        assert_eq!(packet.compute_checksum(), original);
        assert!(packet.is_valid());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let wire = sample_packet().serialize();
        assert!(matches!(
            DeepSpacePacket::deserialize(&wire[..80]),
            Err(PacketError::Truncated(_))
        ));
        assert!(matches!(
            DeepSpacePacket::deserialize(&wire[..wire.len() - 1]),
            Err(PacketError::Truncated(_))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut wire = sample_packet().serialize();
        wire[96] = 0x7f;
        assert_eq!(
            DeepSpacePacket::deserialize(&wire),
            Err(PacketError::UnknownType(0x7f))
        );
    }

    #[test]
    fn test_route_history_capped_on_wire() {
        let mut packet = sample_packet();
        packet.route_history = (0..15).map(|i| format!("relay-{}", i)).collect();

        let decoded = DeepSpacePacket::deserialize(&packet.serialize()).unwrap();
        assert_eq!(decoded.route_history.len(), MAX_ROUTE_ENTRIES);
    }

    proptest! {
        // Flipping any bit in the integrity-covered region must invalidate
        // the packet. Route count byte and route entries are exempt.
        #[test]
        fn prop_bit_flip_detected(bit in 0usize..(98 * 8)) {
            let packet = sample_packet();
            let mut wire = packet.serialize();

            let byte = bit / 8;
            // Skip the padding tail of each 32-byte id field; flipping a
            // pad null changes the decoded string only when it splits the
            // field, so restrict to bytes the ids actually occupy plus the
            // numeric fields.
            let id_len = packet.packet_id.len();
            let in_ids = byte < id_len
                || (32..32 + packet.source_id.len()).contains(&byte)
                || (64..64 + packet.destination_id.len()).contains(&byte);
            let in_numeric = (96..114).contains(&byte);
            prop_assume!(in_ids || in_numeric);
            // Type/priority bytes must stay decodable
            if byte == 96 || byte == 97 {
                prop_assume!(false);
            }

            wire[byte] ^= 1 << (bit % 8);

            match DeepSpacePacket::deserialize(&wire) {
                Ok(decoded) => prop_assert!(!decoded.is_valid()),
                Err(_) => {} // structurally rejected is also a detection
            }
        }

        #[test]
        fn prop_payload_flip_detected(idx in 0usize..15) {
            let packet = sample_packet();
            let mut wire = packet.serialize();
            let payload_start = wire.len() - packet.payload.len();
            wire[payload_start + idx] ^= 0x01;

            let decoded = DeepSpacePacket::deserialize(&wire).unwrap();
            prop_assert!(!decoded.is_valid());
        }
    }
}
