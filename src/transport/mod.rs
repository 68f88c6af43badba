//! Adapter Layer
//!
//! Channel types and addresses shared by the mesh runtime and the platform
//! adapters that move raw frames. An adapter feeds received frames into a
//! packet channel and drains an outbound channel through a single writer,
//! so frames from concurrent senders are never interleaved.
//!
//! Two adapters ship with the crate: `udp::UdpAdapter` standing in for the
//! radio on IP networks, and `memory::MemoryNetwork` for in-process
//! simulation.

pub mod memory;
pub mod udp;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::NodeAddr;

// ============================================================================
// Packet Channel Types
// ============================================================================

/// A frame received by an adapter.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    /// Remote peer address.
    pub remote_addr: TransportAddr,
    /// Frame data.
    pub data: Vec<u8>,
    /// Receipt timestamp (Unix milliseconds).
    pub timestamp_ms: u64,
}

impl ReceivedPacket {
    /// Create a new received packet with current timestamp.
    pub fn new(remote_addr: TransportAddr, data: Vec<u8>) -> Self {
        Self {
            remote_addr,
            data,
            timestamp_ms: now_ms(),
        }
    }

    /// Create a received packet with explicit timestamp.
    pub fn with_timestamp(remote_addr: TransportAddr, data: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            remote_addr,
            data,
            timestamp_ms,
        }
    }
}

/// A frame queued for transmission by an adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundPacket {
    /// Destination address on the adapter.
    pub remote_addr: TransportAddr,
    /// Frame data.
    pub data: Vec<u8>,
}

impl OutboundPacket {
    /// Create an outbound packet.
    pub fn new(remote_addr: TransportAddr, data: Vec<u8>) -> Self {
        Self { remote_addr, data }
    }
}

/// Channel sender for received packets.
pub type PacketTx = mpsc::Sender<ReceivedPacket>;

/// Channel receiver for received packets.
pub type PacketRx = mpsc::Receiver<ReceivedPacket>;

/// Channel sender for outbound packets.
pub type OutboundTx = mpsc::Sender<OutboundPacket>;

/// Channel receiver for outbound packets.
pub type OutboundRx = mpsc::Receiver<OutboundPacket>;

/// Create a packet channel with the given buffer size.
pub fn packet_channel(buffer: usize) -> (PacketTx, PacketRx) {
    mpsc::channel(buffer)
}

/// Create an outbound channel with the given buffer size.
pub fn outbound_channel(buffer: usize) -> (OutboundTx, OutboundRx) {
    mpsc::channel(buffer)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors related to adapter operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("adapter not started")]
    NotStarted,

    #[error("adapter already started")]
    AlreadyStarted,

    #[error("adapter failed to start: {0}")]
    StartFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("invalid transport address: {0}")]
    InvalidAddress(String),

    #[error("mtu exceeded: packet {packet_size} > mtu {mtu}")]
    MtuExceeded { packet_size: usize, mtu: u16 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Adapter State
// ============================================================================

/// Adapter lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// Configured but not started.
    Configured,
    /// Initialization in progress.
    Starting,
    /// Ready for traffic.
    Up,
    /// Was up, now stopped.
    Down,
    /// Failed to start.
    Failed,
}

impl TransportState {
    /// Check if the adapter is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, TransportState::Up)
    }

    /// Check if the adapter can be started.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            TransportState::Configured | TransportState::Down | TransportState::Failed
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Configured => "configured",
            TransportState::Starting => "starting",
            TransportState::Up => "up",
            TransportState::Down => "down",
            TransportState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Transport Address
// ============================================================================

/// Opaque adapter-specific address.
///
/// Each adapter interprets this differently:
/// - radio: the device address in canonical text form
/// - UDP: "ip:port"
/// - memory: any label chosen at attach time
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportAddr(Vec<u8>);

impl TransportAddr {
    /// Create a transport address from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create a transport address from a string.
    pub fn from_string(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }

    /// Radio address of a node: its device address in canonical text form.
    pub fn from_node_addr(addr: &NodeAddr) -> Self {
        Self::from_string(&addr.to_string())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Try to interpret as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Get the length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "TransportAddr(\"{}\")", s),
            None => write!(f, "TransportAddr({:?})", self.0),
        }
    }
}

impl fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Best-effort display as string if valid UTF-8, else hex
        match self.as_str() {
            Some(s) => write!(f, "{}", s),
            None => {
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for TransportAddr {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for TransportAddr {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}
