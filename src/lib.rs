//! BlueNet: link-state mesh routing for short-range radio peers
//!
//! Peers connected pairwise over an unreliable radio link organize
//! themselves into a mesh, flood link-state advertisements, compute
//! shortest paths, and exchange port-addressed datagrams and text messages
//! over multiple hops.

pub mod config;
pub mod identity;
pub mod mesh;
pub mod protocol;
pub mod routing;
pub mod socket;
pub mod transport;

// Re-export identity types
pub use identity::{IdentityError, Node, NodeAddr};

// Re-export config types
pub use config::{Config, ConfigError, IdentityConfig, PeerConfig, UdpConfig};

// Re-export protocol types
pub use protocol::{
    AppMessage, Envelope, LinkStateAdvertisement, Packet, ProtocolError, RoutingMessage, Segment,
    SegmentKind, CONTROL_PORT,
};

// Re-export routing types
pub use routing::{LinkState, RouteEntry, RoutingEngine, RoutingError, RoutingTable};

// Re-export socket types
pub use socket::{
    MemoryMessageStore, MessageRecord, MessageStore, SocketError, SocketId, SocketManager,
    StoreError,
};

// Re-export transport types
pub use transport::{
    OutboundPacket, PacketRx, PacketTx, ReceivedPacket, TransportAddr, TransportError,
    TransportState,
};

// Re-export mesh types
pub use mesh::{Mesh, MeshError, MeshEvent, MeshHandle, Socket};
