//! The mesh worker: event loop, packet dispatch and forwarding.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use super::{AddressBook, MeshCommand, MeshError, MeshEvent, MeshStats, PacketStats};
use crate::config::Config;
use crate::protocol::{AppMessage, Envelope, Packet};
use crate::routing::RoutingEngine;
use crate::socket::{Dispatch, MessageStore, SocketId, SocketManager};
use crate::transport::{OutboundPacket, OutboundTx, PacketRx, ReceivedPacket, TransportAddr};
use crate::{Node, NodeAddr};

/// A configured peer after validation.
#[derive(Clone, Debug)]
pub(super) struct SeedPeer {
    pub(super) node: Node,
    pub(super) transport_addr: TransportAddr,
    pub(super) auto_connect: bool,
}

/// State owned by the worker task.
pub(super) struct MeshWorker {
    local: Node,
    default_ttl: u8,
    engine: RoutingEngine,
    sockets: SocketManager,
    address_book: AddressBook,
    outbound_tx: OutboundTx,
    events: broadcast::Sender<MeshEvent>,
    /// Nodes reported available to listeners, excluding the local node.
    available: BTreeMap<NodeAddr, Node>,
    stats: PacketStats,
}

impl MeshWorker {
    pub(super) fn new(
        config: &Config,
        local: Node,
        store: Box<dyn MessageStore>,
        outbound_tx: OutboundTx,
        events: broadcast::Sender<MeshEvent>,
    ) -> Self {
        let node = &config.node;
        Self {
            engine: RoutingEngine::new(local.clone()),
            sockets: SocketManager::new(
                local.clone(),
                node.control_port,
                node.limits.max_sockets,
                store,
            ),
            address_book: AddressBook::new(node.limits.max_peers),
            default_ttl: node.default_ttl,
            local,
            outbound_tx,
            events,
            available: BTreeMap::new(),
            stats: PacketStats::default(),
        }
    }

    /// Enter configured peers into the address book and start handshakes
    /// with the auto-connect ones.
    pub(super) fn seed_peers(&mut self, peers: Vec<SeedPeer>) {
        for peer in peers {
            let addr = *peer.node.addr();
            if addr == *self.local.addr() {
                debug!(peer = %addr, "Skipping configured peer with local address");
                continue;
            }
            self.address_book.insert(addr, peer.transport_addr);
            if peer.auto_connect {
                debug!(peer = %peer.node.display_name(), "Auto-connecting configured peer");
                self.engine.connect_to(&peer.node);
            }
        }
        self.flush_engine();
    }

    // === Event loop ===

    /// Run until stopped or until the packet channel closes.
    pub(super) async fn run(mut self, mut packet_rx: PacketRx, mut command_rx: mpsc::Receiver<MeshCommand>) {
        info!(node = %self.local.display_name(), "Mesh worker started");

        loop {
            tokio::select! {
                packet = packet_rx.recv() => {
                    match packet {
                        Some(p) => self.process_packet(p),
                        None => {
                            info!("Packet channel closed");
                            break;
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(MeshCommand::Stop { reply }) => {
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
            }
        }

        info!(node = %self.local.display_name(), "Mesh worker stopped");
    }

    pub(super) fn handle_command(&mut self, command: MeshCommand) {
        // A dropped reply receiver only means the caller gave up waiting.
        match command {
            MeshCommand::ConnectTo { node, reply } => {
                let started = node.addr() != self.local.addr() && self.engine.connect_to(&node);
                self.flush_engine();
                let _ = reply.send(started);
            }
            MeshCommand::RemoveNode { addr, reply } => {
                let removed = self.engine.remove_node(&addr);
                self.flush_engine();
                let _ = reply.send(removed);
            }
            MeshCommand::Quit { reply } => {
                let result = self.engine.quit().map_err(MeshError::from);
                self.flush_engine();
                let _ = reply.send(result);
            }
            MeshCommand::AvailableNodes { reply } => {
                let _ = reply.send(self.engine.available_nodes());
            }
            MeshCommand::Neighbors { reply } => {
                let _ = reply.send(self.engine.neighbors());
            }
            MeshCommand::LinkState { addr, reply } => {
                let _ = reply.send(self.engine.link_state(&addr));
            }
            MeshCommand::RoutingTable { reply } => {
                let _ = reply.send(self.engine.routing_table().cloned());
            }
            MeshCommand::RenderDot { reply } => {
                let _ = reply.send(self.engine.render_dot());
            }
            MeshCommand::AddPeer { addr, transport_addr, reply } => {
                let _ = reply.send(self.address_book.insert(addr, transport_addr));
            }
            MeshCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            MeshCommand::RequestSocket { kind, reply } => {
                let _ = reply.send(self.sockets.request_socket(kind).map_err(MeshError::from));
            }
            MeshCommand::Bind { id, port, reply } => {
                let _ = reply.send(self.sockets.bind(id, port).map_err(MeshError::from));
            }
            MeshCommand::LocalPort { id, reply } => {
                let _ = reply.send(self.sockets.local_port(id).map_err(MeshError::from));
            }
            MeshCommand::Connect { id, remote, port, reply } => {
                let _ = reply.send(self.sockets.connect(id, remote, port).map_err(MeshError::from));
            }
            MeshCommand::SetReceiveHandler { id, handler, reply } => {
                let _ = reply.send(
                    self.sockets
                        .set_receive_handler(id, handler)
                        .map_err(MeshError::from),
                );
            }
            MeshCommand::SendDatagram { id, dest, payload, reply } => {
                let _ = reply.send(self.send_datagram(id, dest, payload));
            }
            MeshCommand::CloseSocket { id, reply } => {
                let _ = reply.send(self.sockets.remove_socket(id).map_err(MeshError::from));
            }
            MeshCommand::SendMessage { dest, text, data, reply } => {
                let _ = reply.send(self.send_message(dest, text, data));
            }
            MeshCommand::BroadcastMessage { text, data, reply } => {
                let _ = reply.send(self.broadcast_message(text, data));
            }
            MeshCommand::Stop { reply } => {
                let _ = reply.send(());
            }
        }
    }

    // === Inbound ===

    /// Handle one frame from the adapter.
    pub(super) fn process_packet(&mut self, received: ReceivedPacket) {
        self.stats.received += 1;

        let packet = match Packet::decode(&received.data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(from = %received.remote_addr, error = %e, "Dropping malformed packet");
                self.stats.dropped_malformed += 1;
                return;
            }
        };

        let local = *self.local.addr();
        if packet.hop == local {
            trace!(from = %received.remote_addr, "Dropping own packet");
            self.stats.dropped_own_echo += 1;
            return;
        }
        self.address_book.insert(packet.hop, received.remote_addr);

        if packet.dst == local {
            self.deliver_local(packet);
        } else {
            self.forward(packet);
        }
    }

    fn deliver_local(&mut self, packet: Packet) {
        self.stats.delivered_local += 1;
        match self.sockets.handle_segment(packet.src, &packet.segment) {
            Dispatch::Routing(message) => {
                if packet.src != packet.hop {
                    debug!(
                        src = %packet.src,
                        hop = %packet.hop,
                        kind = message.name(),
                        "Routing message arrived over multiple hops"
                    );
                }
                self.engine.handle_message(message);
                self.flush_engine();
            }
            Dispatch::Stored(message) => {
                let _ = self.events.send(MeshEvent::MessageReceived(message));
            }
            Dispatch::Delivered(_) | Dispatch::Dropped => {}
        }
    }

    /// Relay a packet toward its destination.
    fn forward(&mut self, mut packet: Packet) {
        let Some(next_hop) = self.next_hop(&packet.dst) else {
            debug!(src = %packet.src, dst = %packet.dst, "No route, dropping packet");
            self.stats.dropped_no_route += 1;
            return;
        };
        if !packet.advance(*self.local.addr()) {
            debug!(src = %packet.src, dst = %packet.dst, "Hop limit exhausted, dropping packet");
            self.stats.dropped_ttl += 1;
            return;
        }
        trace!(src = %packet.src, dst = %packet.dst, next_hop = %next_hop, ttl = packet.ttl, "Forwarding packet");
        self.stats.forwarded += 1;
        self.transmit(next_hop, packet.encode());
    }

    // === Outbound ===

    fn next_hop(&self, dest: &NodeAddr) -> Option<NodeAddr> {
        self.engine
            .routing_table()
            .and_then(|table| table.next_hop(dest))
            .map(|node| *node.addr())
    }

    /// Queue one frame for the adapter; never waits.
    fn transmit(&mut self, to: NodeAddr, data: Vec<u8>) {
        let remote_addr = self.address_book.resolve(&to);
        match self.outbound_tx.try_send(OutboundPacket::new(remote_addr, data)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(to = %to, "Outbound queue full, dropping packet");
                self.stats.dropped_queue_full += 1;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(to = %to, "Outbound queue closed, dropping packet");
                self.stats.dropped_queue_full += 1;
            }
        }
    }

    /// Send the engine's queued control messages, in order, and report
    /// availability changes.
    fn flush_engine(&mut self) {
        let local = *self.local.addr();
        for outgoing in self.engine.drain_outbox() {
            let kind = outgoing.message.name();
            let envelope = Envelope::Routing(outgoing.message);
            let segment = match self.sockets.control_segment(&envelope) {
                Ok(segment) => segment,
                Err(e) => {
                    warn!(to = %outgoing.to, kind, error = %e, "Failed to encode control message");
                    continue;
                }
            };
            // Control messages always go straight to the neighbor.
            let packet = Packet::new(local, outgoing.to, segment).with_ttl(self.default_ttl.max(1));
            trace!(to = %outgoing.to, kind, "Sending control message");
            self.transmit(outgoing.to, packet.encode());
        }
        self.update_availability();
    }

    fn update_availability(&mut self) {
        let current: BTreeMap<NodeAddr, Node> = self
            .engine
            .available_nodes()
            .into_iter()
            .filter(|node| node.addr() != self.local.addr())
            .map(|node| (*node.addr(), node))
            .collect();

        for (addr, node) in &self.available {
            if !current.contains_key(addr) {
                info!(node = %node.display_name(), "Node unavailable");
                let _ = self.events.send(MeshEvent::NodeUnavailable(node.clone()));
            }
        }
        for (addr, node) in &current {
            if !self.available.contains_key(addr) {
                info!(node = %node.display_name(), "Node available");
                let _ = self.events.send(MeshEvent::NodeAvailable(node.clone()));
            }
        }
        self.available = current;
    }

    /// Wrap a locally originated segment and send it toward `dest`.
    fn originate(&mut self, dest: NodeAddr, segment: Vec<u8>) -> Result<(), MeshError> {
        if dest == *self.local.addr() {
            return Err(MeshError::SendToSelf);
        }
        if self.default_ttl == 0 {
            return Err(MeshError::TtlExhausted);
        }
        let next_hop = self.next_hop(&dest).ok_or(MeshError::NoRoute(dest))?;
        let packet = Packet::new(*self.local.addr(), dest, segment).with_ttl(self.default_ttl);
        self.stats.originated += 1;
        self.transmit(next_hop, packet.encode());
        Ok(())
    }

    fn send_datagram(
        &mut self,
        id: SocketId,
        dest: Option<(NodeAddr, u16)>,
        payload: Vec<u8>,
    ) -> Result<(), MeshError> {
        if let Some((addr, _)) = dest
            && addr == *self.local.addr()
        {
            return Err(MeshError::SendToSelf);
        }
        let (dest, segment) = self.sockets.datagram_segment(id, dest, payload)?;
        self.originate(dest, segment)
    }

    fn send_message(&mut self, dest: NodeAddr, text: String, data: Vec<u8>) -> Result<(), MeshError> {
        if dest == *self.local.addr() {
            return Err(MeshError::SendToSelf);
        }
        let message = AppMessage::new(self.local.clone(), now_secs(), text).with_data(data);
        let segment = self.sockets.control_segment(&Envelope::Message(message))?;
        self.originate(dest, segment)
    }

    fn broadcast_message(&mut self, text: String, data: Vec<u8>) -> Result<usize, MeshError> {
        let targets: Vec<NodeAddr> = self.available.keys().copied().collect();
        let mut sent = 0;
        for dest in targets {
            match self.send_message(dest, text.clone(), data.clone()) {
                Ok(()) => sent += 1,
                Err(MeshError::NoRoute(addr)) => {
                    debug!(dest = %addr, "Skipping unreachable node in broadcast");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(sent, "Broadcast message sent");
        Ok(sent)
    }

    // === Accessors ===

    pub(super) fn stats(&self) -> MeshStats {
        MeshStats {
            packets: self.stats.clone(),
            routing: self.engine.stats().clone(),
            sockets: self.sockets.stats().clone(),
        }
    }

    #[cfg(test)]
    pub(super) fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    #[cfg(test)]
    pub(super) fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    #[cfg(test)]
    pub(super) fn handle_routing(&mut self, message: crate::protocol::RoutingMessage) {
        self.engine.handle_message(message);
        self.flush_engine();
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
