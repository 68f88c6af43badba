//! Transport Multiplexer
//!
//! Owns the set of open sockets and demultiplexes inbound segments by
//! destination port. The control port is reserved: datagrams addressed to
//! it carry an envelope that is either handed back to the caller as a
//! routing message or persisted through the message store.
//!
//! The manager is owned by the mesh worker; it performs no I/O itself.
//! Outbound helpers only build segment bytes for the worker to send.

mod store;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::protocol::{AppMessage, Envelope, ProtocolError, RoutingMessage, Segment, SegmentKind};
use crate::{Node, NodeAddr};

pub use store::{MemoryMessageStore, MessageRecord, MessageStore, StoreError};

/// First port handed out to sockets that send before binding.
pub const EPHEMERAL_PORT_START: u16 = 49152;

// ============================================================================
// Errors
// ============================================================================

/// Errors returned to socket callers.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("unknown socket {0}")]
    UnknownSocket(SocketId),

    #[error("port {0} already in use")]
    PortInUse(u16),

    #[error("port {0} is reserved")]
    ReservedPort(u16),

    #[error("socket {0} is not bound")]
    NotBound(SocketId),

    #[error("socket {0} has no default destination")]
    NotConnected(SocketId),

    #[error("socket limit reached ({0})")]
    TooManySockets(usize),

    #[error("{0} sockets cannot send")]
    UnsupportedKind(SegmentKind),

    #[error("no free ephemeral port")]
    PortsExhausted,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

// ============================================================================
// Socket Types
// ============================================================================

/// Identifier of an open socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u32);

impl SocketId {
    /// Create a socket ID.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket:{}", self.0)
    }
}

/// A datagram delivered to a socket's receive handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketDatagram {
    /// Originating node.
    pub source: NodeAddr,
    /// Port of the sending socket.
    pub source_port: u16,
    /// Application payload.
    pub payload: Vec<u8>,
}

/// Channel sender for socket deliveries.
pub type DatagramTx = mpsc::Sender<SocketDatagram>;

/// Channel receiver for socket deliveries.
pub type DatagramRx = mpsc::Receiver<SocketDatagram>;

/// Create a socket delivery channel with the given buffer size.
pub fn datagram_channel(buffer: usize) -> (DatagramTx, DatagramRx) {
    mpsc::channel(buffer)
}

/// State of one open socket.
#[derive(Debug)]
pub struct SocketEntry {
    /// Transport kind requested at creation.
    pub kind: SegmentKind,
    /// Local port, once bound.
    pub bound_port: Option<u16>,
    /// Default destination set by `connect`.
    pub remote: Option<(NodeAddr, u16)>,
    /// Receive handler; deliveries are dropped while unset.
    pub handler: Option<DatagramTx>,
}

impl SocketEntry {
    fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            bound_port: None,
            remote: None,
            handler: None,
        }
    }
}

/// Outcome of demultiplexing one inbound segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Payload handed to a socket's receive handler.
    Delivered(SocketId),
    /// Control-port routing message for the routing engine.
    Routing(RoutingMessage),
    /// Control-port application message, already inserted into the store.
    Stored(AppMessage),
    /// Nothing happened.
    Dropped,
}

/// Socket counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SocketStats {
    pub delivered: u64,
    pub stored: u64,
    pub routing: u64,
    pub dropped_malformed: u64,
    pub dropped_unbound: u64,
    pub dropped_no_handler: u64,
    pub dropped_handler_full: u64,
    pub store_failures: u64,
}

// ============================================================================
// Socket Manager
// ============================================================================

/// The transport multiplexer for one node.
pub struct SocketManager {
    /// Local identity, recorded as the receiver of stored messages.
    local: Node,
    control_port: u16,
    max_sockets: usize,
    next_id: u32,
    next_ephemeral: u16,
    sockets: HashMap<SocketId, SocketEntry>,
    /// Bound port index; at most one open socket per port.
    ports: HashMap<u16, SocketId>,
    store: Box<dyn MessageStore>,
    stats: SocketStats,
}

impl SocketManager {
    /// Create a multiplexer with no open sockets.
    pub fn new(
        local: Node,
        control_port: u16,
        max_sockets: usize,
        store: Box<dyn MessageStore>,
    ) -> Self {
        Self {
            local,
            control_port,
            max_sockets,
            next_id: 1,
            next_ephemeral: EPHEMERAL_PORT_START,
            sockets: HashMap::new(),
            ports: HashMap::new(),
            store,
            stats: SocketStats::default(),
        }
    }

    /// The reserved control port.
    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Number of open sockets.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Look up an open socket.
    pub fn get(&self, id: SocketId) -> Option<&SocketEntry> {
        self.sockets.get(&id)
    }

    /// Socket currently bound to `port`.
    pub fn socket_for_port(&self, port: u16) -> Option<SocketId> {
        self.ports.get(&port).copied()
    }

    /// Counters.
    pub fn stats(&self) -> &SocketStats {
        &self.stats
    }

    // === Socket lifecycle ===

    /// Allocate and register an unbound socket.
    pub fn request_socket(&mut self, kind: SegmentKind) -> Result<SocketId, SocketError> {
        if self.sockets.len() >= self.max_sockets {
            return Err(SocketError::TooManySockets(self.max_sockets));
        }
        // Ids wrap; skip ones still held by live sockets.
        let id = loop {
            let candidate = SocketId::new(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.sockets.contains_key(&candidate) {
                break candidate;
            }
        };
        self.sockets.insert(id, SocketEntry::new(kind));
        debug!(socket = %id, kind = %kind, "Socket opened");
        Ok(id)
    }

    /// Bind a socket to a local port and return the bound port.
    ///
    /// Port 0 picks a free ephemeral port. Rebinding moves the socket and
    /// frees its previous port.
    pub fn bind(&mut self, id: SocketId, port: u16) -> Result<u16, SocketError> {
        if !self.sockets.contains_key(&id) {
            return Err(SocketError::UnknownSocket(id));
        }
        if port == 0 {
            let port = self.ephemeral_port()?;
            self.assign_port(id, port);
            return Ok(port);
        }
        if port == self.control_port {
            return Err(SocketError::ReservedPort(port));
        }
        match self.ports.get(&port) {
            Some(holder) if *holder == id => return Ok(port),
            Some(_) => return Err(SocketError::PortInUse(port)),
            None => {}
        }
        self.assign_port(id, port);
        Ok(port)
    }

    /// The port a socket is bound to.
    pub fn local_port(&self, id: SocketId) -> Result<u16, SocketError> {
        self.sockets
            .get(&id)
            .ok_or(SocketError::UnknownSocket(id))?
            .bound_port
            .ok_or(SocketError::NotBound(id))
    }

    /// Set the default destination for `send`.
    pub fn connect(&mut self, id: SocketId, remote: NodeAddr, port: u16) -> Result<(), SocketError> {
        let entry = self
            .sockets
            .get_mut(&id)
            .ok_or(SocketError::UnknownSocket(id))?;
        entry.remote = Some((remote, port));
        Ok(())
    }

    /// Install or clear the receive handler.
    pub fn set_receive_handler(
        &mut self,
        id: SocketId,
        handler: Option<DatagramTx>,
    ) -> Result<(), SocketError> {
        let entry = self
            .sockets
            .get_mut(&id)
            .ok_or(SocketError::UnknownSocket(id))?;
        entry.handler = handler;
        Ok(())
    }

    /// Unregister a socket, freeing its port.
    pub fn remove_socket(&mut self, id: SocketId) -> Result<(), SocketError> {
        let entry = self
            .sockets
            .remove(&id)
            .ok_or(SocketError::UnknownSocket(id))?;
        if let Some(port) = entry.bound_port {
            self.ports.remove(&port);
        }
        debug!(socket = %id, port = ?entry.bound_port, "Socket closed");
        Ok(())
    }

    // === Outbound ===

    /// Build segment bytes for a datagram sent from `id`.
    ///
    /// Uses the connected destination when `dest` is `None`. An unbound
    /// socket is given an ephemeral port first. Returns the destination
    /// node and the encoded segment.
    pub fn datagram_segment(
        &mut self,
        id: SocketId,
        dest: Option<(NodeAddr, u16)>,
        payload: Vec<u8>,
    ) -> Result<(NodeAddr, Vec<u8>), SocketError> {
        let (kind, remote, bound_port) = match self.sockets.get(&id) {
            Some(entry) => (entry.kind, entry.remote, entry.bound_port),
            None => return Err(SocketError::UnknownSocket(id)),
        };
        if kind != SegmentKind::Datagram {
            return Err(SocketError::UnsupportedKind(kind));
        }
        let (dest_addr, dest_port) = dest.or(remote).ok_or(SocketError::NotConnected(id))?;

        let src_port = match bound_port {
            Some(port) => port,
            None => {
                let port = self.ephemeral_port()?;
                self.assign_port(id, port);
                port
            }
        };

        let segment = Segment::datagram(src_port, dest_port, payload).encode()?;
        Ok((dest_addr, segment))
    }

    /// Build segment bytes carrying an envelope to a peer's control port.
    pub fn control_segment(&self, envelope: &Envelope) -> Result<Vec<u8>, SocketError> {
        let payload = envelope.encode()?;
        Ok(Segment::datagram(self.control_port, self.control_port, payload).encode()?)
    }

    // === Inbound ===

    /// Demultiplex one inbound segment from `source`.
    pub fn handle_segment(&mut self, source: NodeAddr, data: &[u8]) -> Dispatch {
        let segment = match Segment::decode(data) {
            Ok(segment) => segment,
            Err(e) => {
                debug!(source = %source, error = %e, "Dropping malformed segment");
                self.stats.dropped_malformed += 1;
                return Dispatch::Dropped;
            }
        };

        let datagram = match segment {
            Segment::Datagram(dg) => dg,
            Segment::Stream(data) => {
                trace!(source = %source, len = data.len(), "Ignoring stream segment");
                return Dispatch::Dropped;
            }
        };

        if datagram.dst_port == self.control_port {
            return self.handle_control(source, &datagram.payload);
        }

        let Some(id) = self.ports.get(&datagram.dst_port).copied() else {
            debug!(source = %source, port = datagram.dst_port, "No socket bound to port");
            self.stats.dropped_unbound += 1;
            return Dispatch::Dropped;
        };
        let Some(handler) = self.sockets.get(&id).and_then(|e| e.handler.as_ref()) else {
            trace!(socket = %id, "Socket has no receive handler");
            self.stats.dropped_no_handler += 1;
            return Dispatch::Dropped;
        };

        let delivery = SocketDatagram {
            source,
            source_port: datagram.src_port,
            payload: datagram.payload,
        };
        match handler.try_send(delivery) {
            Ok(()) => {
                self.stats.delivered += 1;
                Dispatch::Delivered(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(socket = %id, "Receive handler full, dropping datagram");
                self.stats.dropped_handler_full += 1;
                Dispatch::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(socket = %id, "Receive handler closed, clearing it");
                if let Some(entry) = self.sockets.get_mut(&id) {
                    entry.handler = None;
                }
                self.stats.dropped_no_handler += 1;
                Dispatch::Dropped
            }
        }
    }

    fn handle_control(&mut self, source: NodeAddr, payload: &[u8]) -> Dispatch {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(source = %source, error = %e, "Dropping malformed control envelope");
                self.stats.dropped_malformed += 1;
                return Dispatch::Dropped;
            }
        };

        match envelope {
            Envelope::Routing(message) => {
                self.stats.routing += 1;
                Dispatch::Routing(message)
            }
            Envelope::Message(message) => {
                let record = MessageRecord {
                    sender_name: message.sender.name().to_string(),
                    sender_address: *message.sender.addr(),
                    receiver_name: self.local.name().to_string(),
                    receiver_address: *self.local.addr(),
                    text: message.text.clone(),
                    timestamp: message.timestamp,
                };
                match self.store.insert(record) {
                    Ok(()) => {
                        debug!(from = %message.sender.display_name(), len = message.text.len(), "Stored message");
                        self.stats.stored += 1;
                        Dispatch::Stored(message)
                    }
                    Err(e) => {
                        warn!(from = %message.sender.display_name(), error = %e, "Failed to store message");
                        self.stats.store_failures += 1;
                        Dispatch::Dropped
                    }
                }
            }
        }
    }

    // === Internals ===

    fn assign_port(&mut self, id: SocketId, port: u16) {
        if let Some(entry) = self.sockets.get_mut(&id) {
            if let Some(old) = entry.bound_port.replace(port) {
                self.ports.remove(&old);
            }
            self.ports.insert(port, id);
            debug!(socket = %id, port, "Socket bound");
        }
    }

    fn ephemeral_port(&mut self) -> Result<u16, SocketError> {
        let span = (u16::MAX - EPHEMERAL_PORT_START) as usize + 1;
        for _ in 0..span {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == u16::MAX {
                EPHEMERAL_PORT_START
            } else {
                port + 1
            };
            if port != self.control_port && !self.ports.contains_key(&port) {
                return Ok(port);
            }
        }
        Err(SocketError::PortsExhausted)
    }
}

impl fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketManager")
            .field("local", &self.local)
            .field("control_port", &self.control_port)
            .field("sockets", &self.sockets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
