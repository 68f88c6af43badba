//! Mesh Runtime
//!
//! Runs one node: a single worker task owns the routing engine, the socket
//! multiplexer and the peer address book, and is the only consumer of the
//! adapter's packet channel. Applications talk to it through a cloneable
//! [`MeshHandle`]; every call is a command with a oneshot reply, so all
//! engine mutations are serialized through the worker.

mod address_book;
mod worker;

#[cfg(test)]
mod tests;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::protocol::{AppMessage, ProtocolError, SegmentKind};
use crate::routing::{LinkState, RoutingError, RoutingStats, RoutingTable};
use crate::socket::{
    datagram_channel, DatagramRx, DatagramTx, MessageStore, SocketError, SocketId, SocketStats,
};
use crate::transport::{OutboundTx, PacketRx, TransportAddr};
use crate::{IdentityError, Node, NodeAddr};

pub use address_book::AddressBook;
use worker::{MeshWorker, SeedPeer};

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by the mesh runtime.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh worker stopped")]
    Stopped,

    #[error("mesh already running")]
    AlreadyRunning,

    #[error("no route to {0}")]
    NoRoute(NodeAddr),

    #[error("cannot send to the local node")]
    SendToSelf,

    #[error("hop limit is zero")]
    TtlExhausted,

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

// ============================================================================
// Events and Stats
// ============================================================================

/// Notifications for node and message listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshEvent {
    /// A node's advertisement became known.
    NodeAvailable(Node),
    /// A node's advertisement was removed.
    NodeUnavailable(Node),
    /// A control-port message addressed to this node was stored.
    MessageReceived(AppMessage),
}

/// Packet counters kept by the worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub received: u64,
    pub delivered_local: u64,
    pub forwarded: u64,
    pub originated: u64,
    pub dropped_malformed: u64,
    pub dropped_own_echo: u64,
    pub dropped_no_route: u64,
    pub dropped_ttl: u64,
    pub dropped_queue_full: u64,
}

/// Snapshot of all counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub packets: PacketStats,
    pub routing: RoutingStats,
    pub sockets: SocketStats,
}

// ============================================================================
// Commands
// ============================================================================

type Reply<T> = oneshot::Sender<T>;

/// Requests from handles to the worker.
pub(crate) enum MeshCommand {
    ConnectTo { node: Node, reply: Reply<bool> },
    RemoveNode { addr: NodeAddr, reply: Reply<bool> },
    Quit { reply: Reply<Result<usize, MeshError>> },
    AvailableNodes { reply: Reply<Vec<Node>> },
    Neighbors { reply: Reply<Vec<Node>> },
    LinkState { addr: NodeAddr, reply: Reply<LinkState> },
    RoutingTable { reply: Reply<Option<RoutingTable>> },
    RenderDot { reply: Reply<String> },
    AddPeer { addr: NodeAddr, transport_addr: TransportAddr, reply: Reply<bool> },
    Stats { reply: Reply<MeshStats> },
    RequestSocket { kind: SegmentKind, reply: Reply<Result<SocketId, MeshError>> },
    Bind { id: SocketId, port: u16, reply: Reply<Result<u16, MeshError>> },
    LocalPort { id: SocketId, reply: Reply<Result<u16, MeshError>> },
    Connect { id: SocketId, remote: NodeAddr, port: u16, reply: Reply<Result<(), MeshError>> },
    SetReceiveHandler { id: SocketId, handler: Option<DatagramTx>, reply: Reply<Result<(), MeshError>> },
    SendDatagram {
        id: SocketId,
        dest: Option<(NodeAddr, u16)>,
        payload: Vec<u8>,
        reply: Reply<Result<(), MeshError>>,
    },
    CloseSocket { id: SocketId, reply: Reply<Result<(), MeshError>> },
    SendMessage {
        dest: NodeAddr,
        text: String,
        data: Vec<u8>,
        reply: Reply<Result<(), MeshError>>,
    },
    BroadcastMessage { text: String, data: Vec<u8>, reply: Reply<Result<usize, MeshError>> },
    Stop { reply: Reply<()> },
}

// ============================================================================
// Mesh
// ============================================================================

/// A node's runtime, before and after its worker is spawned.
pub struct Mesh {
    local: Node,
    config: Config,
    store: Option<Box<dyn MessageStore>>,
    handle: Option<MeshHandle>,
    task: Option<JoinHandle<()>>,
}

impl Mesh {
    /// Create a runtime for `local`. Nothing runs until `start`.
    pub fn new(config: Config, local: Node, store: Box<dyn MessageStore>) -> Self {
        Self {
            local,
            config,
            store: Some(store),
            handle: None,
            task: None,
        }
    }

    /// The local identity.
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// Spawn the worker over an adapter's channel pair.
    ///
    /// Configured peers are entered into the address book and auto-connect
    /// peers get a handshake before any packet is processed. A runtime can
    /// be started once.
    pub fn start(
        &mut self,
        packet_rx: PacketRx,
        outbound_tx: OutboundTx,
    ) -> Result<MeshHandle, MeshError> {
        if self.store.is_none() {
            return Err(MeshError::AlreadyRunning);
        }
        let peers = self
            .config
            .peers()
            .iter()
            .map(|peer| -> Result<SeedPeer, IdentityError> {
                Ok(SeedPeer {
                    node: peer.node()?,
                    transport_addr: peer.transport_addr()?,
                    auto_connect: peer.is_auto_connect(),
                })
            })
            .collect::<Result<Vec<_>, IdentityError>>()?;
        let Some(store) = self.store.take() else {
            return Err(MeshError::AlreadyRunning);
        };

        let buffers = &self.config.node.buffers;
        let (command_tx, command_rx) = mpsc::channel(buffers.command_channel.max(1));
        let (event_tx, _) = broadcast::channel(buffers.event_channel.max(1));

        let mut worker = MeshWorker::new(
            &self.config,
            self.local.clone(),
            store,
            outbound_tx,
            event_tx.clone(),
        );
        worker.seed_peers(peers);

        let handle = MeshHandle {
            local: self.local.clone(),
            commands: command_tx,
            events: event_tx,
        };
        self.task = Some(tokio::spawn(worker.run(packet_rx, command_rx)));
        self.handle = Some(handle.clone());

        info!(node = %self.local.display_name(), "Mesh started");
        Ok(handle)
    }

    /// Handle to the running worker.
    pub fn handle(&self) -> Option<&MeshHandle> {
        self.handle.as_ref()
    }

    /// Check whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the worker and wait for it to exit.
    pub async fn stop(&mut self) -> Result<(), MeshError> {
        let Some(task) = self.task.take() else {
            return Err(MeshError::Stopped);
        };
        if let Some(handle) = self.handle.take() {
            // The worker may already be gone if its packet channel closed.
            if let Err(e) = handle.stop().await {
                debug!(error = %e, "Mesh worker already exited");
            }
        }
        if let Err(e) = task.await {
            debug!(error = %e, "Mesh worker task ended abnormally");
        }
        info!(node = %self.local.display_name(), "Mesh stopped");
        Ok(())
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable application interface to a running mesh worker.
#[derive(Clone)]
pub struct MeshHandle {
    local: Node,
    commands: mpsc::Sender<MeshCommand>,
    events: broadcast::Sender<MeshEvent>,
}

impl MeshHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> MeshCommand,
    ) -> Result<T, MeshError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| MeshError::Stopped)?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    /// The local identity.
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// Start the handshake with `node`. Returns false if already started.
    pub async fn connect_to(&self, node: Node) -> Result<bool, MeshError> {
        self.request(|reply| MeshCommand::ConnectTo { node, reply }).await
    }

    /// Tear down the link to a neighbor, notifying it first.
    pub async fn remove_node(&self, addr: NodeAddr) -> Result<bool, MeshError> {
        self.request(|reply| MeshCommand::RemoveNode { addr, reply }).await
    }

    /// Tell every neighbor this node is leaving. Returns the number notified.
    pub async fn quit(&self) -> Result<usize, MeshError> {
        self.request(|reply| MeshCommand::Quit { reply }).await?
    }

    /// Every node with a known advertisement, ordered by address.
    pub async fn available_nodes(&self) -> Result<Vec<Node>, MeshError> {
        self.request(|reply| MeshCommand::AvailableNodes { reply }).await
    }

    /// Direct neighbors in the local advertisement.
    pub async fn neighbors(&self) -> Result<Vec<Node>, MeshError> {
        self.request(|reply| MeshCommand::Neighbors { reply }).await
    }

    /// Handshake state with `addr`.
    pub async fn link_state(&self, addr: NodeAddr) -> Result<LinkState, MeshError> {
        self.request(|reply| MeshCommand::LinkState { addr, reply }).await
    }

    /// Copy of the current routing table, if one was computed.
    pub async fn routing_table(&self) -> Result<Option<RoutingTable>, MeshError> {
        self.request(|reply| MeshCommand::RoutingTable { reply }).await
    }

    /// Graphviz rendering of the advertisement graph.
    pub async fn render_dot(&self) -> Result<String, MeshError> {
        self.request(|reply| MeshCommand::RenderDot { reply }).await
    }

    /// Record the adapter address of a peer found by discovery.
    pub async fn add_peer(
        &self,
        addr: NodeAddr,
        transport_addr: TransportAddr,
    ) -> Result<bool, MeshError> {
        self.request(|reply| MeshCommand::AddPeer {
            addr,
            transport_addr,
            reply,
        })
        .await
    }

    /// Snapshot of the worker's counters.
    pub async fn stats(&self) -> Result<MeshStats, MeshError> {
        self.request(|reply| MeshCommand::Stats { reply }).await
    }

    /// Open an unbound socket.
    pub async fn request_socket(&self, kind: SegmentKind) -> Result<Socket, MeshError> {
        let id = self
            .request(|reply| MeshCommand::RequestSocket { kind, reply })
            .await??;
        Ok(Socket {
            id,
            mesh: self.clone(),
            closed: false,
        })
    }

    /// Send a text message (plus optional object bytes) to `dest`.
    pub async fn send_message(
        &self,
        dest: NodeAddr,
        text: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<(), MeshError> {
        let text = text.into();
        self.request(|reply| MeshCommand::SendMessage {
            dest,
            text,
            data,
            reply,
        })
        .await?
    }

    /// Send a message to every available node. Returns the number sent.
    pub async fn broadcast_message(
        &self,
        text: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<usize, MeshError> {
        let text = text.into();
        self.request(|reply| MeshCommand::BroadcastMessage { text, data, reply })
            .await?
    }

    /// Receive node and message events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Ask the worker to exit.
    pub async fn stop(&self) -> Result<(), MeshError> {
        self.request(|reply| MeshCommand::Stop { reply }).await
    }
}

impl std::fmt::Debug for MeshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshHandle")
            .field("local", &self.local)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

// ============================================================================
// Socket
// ============================================================================

/// An open socket on a running mesh.
///
/// Dropping the handle closes the socket and frees its port.
#[derive(Debug)]
pub struct Socket {
    id: SocketId,
    mesh: MeshHandle,
    closed: bool,
}

impl Socket {
    /// The socket's identifier.
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Bind to `port` (0 picks an ephemeral port). Returns the bound port.
    pub async fn bind(&self, port: u16) -> Result<u16, MeshError> {
        let id = self.id;
        self.mesh
            .request(|reply| MeshCommand::Bind { id, port, reply })
            .await?
    }

    /// The bound port.
    pub async fn local_port(&self) -> Result<u16, MeshError> {
        let id = self.id;
        self.mesh
            .request(|reply| MeshCommand::LocalPort { id, reply })
            .await?
    }

    /// Set the default destination used by `send`.
    pub async fn connect(&self, remote: NodeAddr, port: u16) -> Result<(), MeshError> {
        let id = self.id;
        self.mesh
            .request(|reply| MeshCommand::Connect {
                id,
                remote,
                port,
                reply,
            })
            .await?
    }

    /// Send to the connected destination.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), MeshError> {
        self.send_datagram(None, payload).await
    }

    /// Send to an explicit destination.
    pub async fn send_to(
        &self,
        dest: NodeAddr,
        port: u16,
        payload: Vec<u8>,
    ) -> Result<(), MeshError> {
        self.send_datagram(Some((dest, port)), payload).await
    }

    async fn send_datagram(
        &self,
        dest: Option<(NodeAddr, u16)>,
        payload: Vec<u8>,
    ) -> Result<(), MeshError> {
        let id = self.id;
        self.mesh
            .request(|reply| MeshCommand::SendDatagram {
                id,
                dest,
                payload,
                reply,
            })
            .await?
    }

    /// Install or clear the channel that receives this socket's datagrams.
    pub async fn set_receive_handler(&self, handler: Option<DatagramTx>) -> Result<(), MeshError> {
        let id = self.id;
        self.mesh
            .request(|reply| MeshCommand::SetReceiveHandler { id, handler, reply })
            .await?
    }

    /// Create a delivery channel and install it as the receive handler.
    pub async fn receiver(&self, buffer: usize) -> Result<DatagramRx, MeshError> {
        let (tx, rx) = datagram_channel(buffer.max(1));
        self.set_receive_handler(Some(tx)).await?;
        Ok(rx)
    }

    /// Close the socket, freeing its port.
    pub async fn close(mut self) -> Result<(), MeshError> {
        let id = self.id;
        self.closed = true;
        self.mesh
            .request(|reply| MeshCommand::CloseSocket { id, reply })
            .await?
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Nobody waits for the reply.
        let (reply, _) = oneshot::channel();
        let command = MeshCommand::CloseSocket { id: self.id, reply };
        if let Err(e) = self.mesh.commands.try_send(command) {
            debug!(socket = %self.id, error = %e, "Could not close dropped socket");
        }
    }
}
