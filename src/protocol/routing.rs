//! Routing-control messages: handshake, link-state advertisement, quit.

use std::collections::BTreeSet;
use std::fmt;

use super::wire::{node_len, put_node, WireReader};
use super::ProtocolError;
use crate::{Node, NodeAddr};

/// Largest neighbor set an advertisement can carry.
pub const MAX_LSA_NEIGHBORS: usize = u16::MAX as usize;

// ============================================================================
// Link-State Advertisement
// ============================================================================

/// One origin's claim about its current direct neighbors.
///
/// ## Wire Format
///
/// ```text
/// [origin:Node][sequence:4 LE][count:2 LE][neighbor:Node]*count
/// ```
///
/// where `Node` is `[addr:6][name_len:1][name]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkStateAdvertisement {
    /// Node that issued this advertisement.
    pub origin: Node,
    /// Strictly increasing per origin.
    pub sequence: u32,
    /// Direct neighbors claimed by the origin.
    pub neighbors: BTreeSet<Node>,
}

impl LinkStateAdvertisement {
    /// Create an advertisement with no neighbors.
    pub fn new(origin: Node, sequence: u32) -> Self {
        Self {
            origin,
            sequence,
            neighbors: BTreeSet::new(),
        }
    }

    /// Add a neighbor (builder style).
    pub fn with_neighbor(mut self, neighbor: Node) -> Self {
        self.neighbors.insert(neighbor);
        self
    }

    /// Check whether this advertisement lists `addr` as a neighbor.
    pub fn lists(&self, addr: &NodeAddr) -> bool {
        self.neighbors.contains(&Node::anonymous(*addr))
    }

    /// Check whether this advertisement is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &LinkStateAdvertisement) -> bool {
        self.sequence > other.sequence
    }

    /// Encode the advertisement body.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if self.neighbors.len() > MAX_LSA_NEIGHBORS {
            return Err(ProtocolError::MessageTooLong {
                max: MAX_LSA_NEIGHBORS,
                got: self.neighbors.len(),
            });
        }
        let body_len = node_len(&self.origin)
            + 6
            + self.neighbors.iter().map(node_len).sum::<usize>();
        buf.reserve(body_len);
        put_node(buf, &self.origin);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(self.neighbors.len() as u16).to_le_bytes());
        for neighbor in &self.neighbors {
            put_node(buf, neighbor);
        }
        Ok(())
    }

    pub(crate) fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let origin = r.node()?;
        let sequence = r.u32()?;
        let count = r.u16()? as usize;
        let mut neighbors = BTreeSet::new();
        for _ in 0..count {
            neighbors.insert(r.node()?);
        }
        Ok(Self {
            origin,
            sequence,
            neighbors,
        })
    }
}

impl fmt::Display for LinkStateAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSA({} seq={} [", self.origin, self.sequence)?;
        for (i, n) in self.neighbors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", n)?;
        }
        write!(f, "])")
    }
}

// ============================================================================
// Routing Messages
// ============================================================================

/// Routing-control message, exhaustively matched by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingMessage {
    /// Handshake initiation, carrying the sender's identity.
    Hello(Node),
    /// Handshake acknowledgement, carrying the sender's identity.
    HelloAck(Node),
    /// A flooded advertisement.
    LinkStateAdvertisement(LinkStateAdvertisement),
    /// The named node is leaving the sender's adjacency.
    Quit(Node),
}

impl RoutingMessage {
    /// Short type name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RoutingMessage::Hello(_) => "Hello",
            RoutingMessage::HelloAck(_) => "HelloAck",
            RoutingMessage::LinkStateAdvertisement(_) => "LinkStateAdvertisement",
            RoutingMessage::Quit(_) => "Quit",
        }
    }
}

impl fmt::Display for RoutingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMessage::Hello(n) => write!(f, "Hello({})", n),
            RoutingMessage::HelloAck(n) => write!(f, "HelloAck({})", n),
            RoutingMessage::LinkStateAdvertisement(lsa) => write!(f, "{}", lsa),
            RoutingMessage::Quit(n) => write!(f, "Quit({})", n),
        }
    }
}
