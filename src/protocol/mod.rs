//! BlueNet Protocol Messages
//!
//! Wire format definitions across three layers, outermost first:
//!
//! ## Network layer (`packet`)
//!
//! A fixed header naming the last hop, the origin and the final destination
//! plus a hop budget. Routing-control traffic is single-hop; application
//! traffic may be forwarded along the routing table.
//!
//! ## Transport layer (`segment`)
//!
//! Segments tagged with a transport kind. Datagram segments carry source and
//! destination ports used by the socket multiplexer.
//!
//! ## Control envelope (`envelope`, `routing`)
//!
//! Payload of datagrams addressed to the control port: routing-control
//! messages for the link-state engine and application messages for the
//! message store.

mod envelope;
mod error;
mod packet;
mod routing;
mod segment;
pub(crate) mod wire;

pub use envelope::{AppMessage, Envelope, EnvelopeType};
pub use error::ProtocolError;
pub use packet::{Packet, DEFAULT_TTL, NETWORK_VERSION, PACKET_HEADER_SIZE};
pub use routing::{LinkStateAdvertisement, RoutingMessage, MAX_LSA_NEIGHBORS};
pub use segment::{
    Datagram, Segment, SegmentKind, DATAGRAM_HEADER_SIZE, MAX_DATAGRAM_PAYLOAD,
};

/// Reserved destination port for routing control and application messages.
///
/// Every peer must agree on this value to interoperate.
pub const CONTROL_PORT: u16 = 50000;
