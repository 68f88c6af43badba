//! Network-layer packet header for hop-by-hop and multi-hop delivery.
//!
//! ## Wire Format (20-byte fixed header)
//!
//! | Offset | Field   | Size    | Description                          |
//! |--------|---------|---------|--------------------------------------|
//! | 0      | version | 1 byte  | `NETWORK_VERSION`                    |
//! | 1      | ttl     | 1 byte  | Decremented at each forwarding hop   |
//! | 2      | hop     | 6 bytes | Address of the node that sent it     |
//! | 8      | src     | 6 bytes | Originating node                     |
//! | 14     | dst     | 6 bytes | Final destination node               |
//! | 20     | segment | var     | Encoded transport segment            |
//!
//! `hop` is rewritten by every forwarder, so the receiver can learn which
//! transport address its direct neighbor uses.

use super::wire::WireReader;
use super::ProtocolError;
use crate::NodeAddr;

/// Network header version.
pub const NETWORK_VERSION: u8 = 1;

/// Size of the fixed packet header.
pub const PACKET_HEADER_SIZE: usize = 20;

/// Default hop limit for originated packets.
pub const DEFAULT_TTL: u8 = 16;

/// A network-layer packet wrapping one encoded segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Remaining hop budget.
    pub ttl: u8,
    /// Last hop that transmitted this packet.
    pub hop: NodeAddr,
    /// Originating node.
    pub src: NodeAddr,
    /// Final destination.
    pub dst: NodeAddr,
    /// Encoded segment bytes.
    pub segment: Vec<u8>,
}

impl Packet {
    /// Create a packet originated by `src`, sent directly by `src`.
    pub fn new(src: NodeAddr, dst: NodeAddr, segment: Vec<u8>) -> Self {
        Self {
            ttl: DEFAULT_TTL,
            hop: src,
            src,
            dst,
            segment,
        }
    }

    /// Set the TTL.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Prepare this packet for the next hop.
    ///
    /// Returns false (leaving the packet untouched) if the hop budget is
    /// exhausted.
    pub fn advance(&mut self, via: NodeAddr) -> bool {
        if self.ttl <= 1 {
            return false;
        }
        self.ttl -= 1;
        self.hop = via;
        true
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.segment.len());
        buf.push(NETWORK_VERSION);
        buf.push(self.ttl);
        buf.extend_from_slice(self.hop.as_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.extend_from_slice(self.dst.as_bytes());
        buf.extend_from_slice(&self.segment);
        buf
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: PACKET_HEADER_SIZE,
                got: data.len(),
            });
        }
        let mut r = WireReader::new(data);
        let version = r.u8()?;
        if version != NETWORK_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let ttl = r.u8()?;
        let hop = r.node_addr()?;
        let src = r.node_addr()?;
        let dst = r.node_addr()?;
        let segment = r.rest().to_vec();

        Ok(Self {
            ttl,
            hop,
            src,
            dst,
            segment,
        })
    }
}
