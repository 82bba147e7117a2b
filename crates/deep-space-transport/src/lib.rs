//! Deep Space Transport - reliable delay-tolerant packet protocol
//!
//! Transport layer for high-latency space links:
//!
//! - Bit-exact binary packet framing with SHA-256 integrity checking
//! - Acknowledgment-based reliability with exponential-backoff retries
//! - Loop- and duplicate-free store-and-forward relaying
//! - Neighbor tracking via heartbeats
//!
//! Ordering is deliberately not guaranteed: retries may take different
//! paths. The only delivery guarantee is at-most-once per source/sequence
//! pair within the duplicate-cache window.

pub mod packet;
pub mod protocol;

pub use packet::{DeepSpacePacket, PacketError, PacketType, Priority};
pub use protocol::{
    DeepSpaceProtocol, NeighborLink, ProtocolConfig, ProtocolStatistics, RoutingUpdate,
};
