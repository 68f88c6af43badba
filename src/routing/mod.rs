//! Link-State Routing Engine
//!
//! Per-neighbor handshake state machine, LSA flooding and shortest-path
//! recomputation. The engine is a synchronous state machine: every input
//! (an application call or a received routing message) mutates local state
//! and appends the resulting transmissions to an ordered outbox, which the
//! mesh worker drains onto the wire after each step.
//!
//! ## Handshake
//!
//! ```text
//!   A                         B
//!   |--- Hello(A) ----------->|  A: None -> HelloSent
//!   |                         |  B: None -> HelloSent (replies with Hello)
//!   |<-------------- Hello(B)-|
//!   |--- HelloAck(A) -------->|  A: HelloSent -> FullyConnected
//!   |<------------ HelloAck(B)|  B: HelloSent -> FullyConnected
//! ```
//!
//! A peer that receives `Hello` while in `None` answers with its own
//! `Hello`; a peer in `HelloSent` answers with `HelloAck` and considers the
//! adjacency complete. Simultaneous connects converge the same way.

mod dot;
mod table;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::protocol::{LinkStateAdvertisement, RoutingMessage};
use crate::{Node, NodeAddr};

pub use table::{RouteEntry, RoutingTable};

/// Sequence number of the first local advertisement.
pub const INITIAL_LSA_SEQUENCE: u32 = 1;

/// Errors returned to callers of the routing engine.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("nothing to quit: not joined to any mesh")]
    NotJoined,
}

/// Handshake state for one neighbor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No handshake in progress.
    #[default]
    None,
    /// We sent `Hello` and await the peer's `Hello` or `HelloAck`.
    HelloSent,
    /// Intermediate state between the two acknowledgements. The two-message
    /// exchange never enters it; it is reported for completeness.
    HandshakeCompleted,
    /// Adjacency established in both directions.
    FullyConnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::None => "none",
            LinkState::HelloSent => "hello-sent",
            LinkState::HandshakeCompleted => "handshake-completed",
            LinkState::FullyConnected => "fully-connected",
        };
        write!(f, "{}", s)
    }
}

/// A routing message queued for a direct neighbor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    /// Neighbor the message is addressed to.
    pub to: NodeAddr,
    /// Message to send.
    pub message: RoutingMessage,
}

/// Engine counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingStats {
    /// Advertisements accepted into the database.
    pub lsas_accepted: u64,
    /// Advertisements dropped as stale or duplicate.
    pub lsas_stale: u64,
    /// Messages discarded because they did not fit the link state.
    pub protocol_violations: u64,
    /// Completed routing table recomputations.
    pub recomputations: u64,
    /// Handshakes that reached `FullyConnected`.
    pub handshakes_completed: u64,
}

/// The link-state routing engine for one local node.
pub struct RoutingEngine {
    /// This node's identity.
    local: Node,
    /// Handshake state per neighbor; absent means `LinkState::None`.
    links: HashMap<NodeAddr, LinkState>,
    /// Latest advertisement per origin, including our own once joined.
    database: HashMap<NodeAddr, LinkStateAdvertisement>,
    /// Last computed routing table.
    table: Option<RoutingTable>,
    /// Lowest sequence our next local advertisement may carry.
    sequence_floor: u32,
    /// Transmissions produced by the last steps, in order.
    outbox: Vec<Outgoing>,
    stats: RoutingStats,
}

impl RoutingEngine {
    /// Create an engine for `local` with no neighbors.
    pub fn new(local: Node) -> Self {
        Self {
            local,
            links: HashMap::new(),
            database: HashMap::new(),
            table: None,
            sequence_floor: INITIAL_LSA_SEQUENCE,
            outbox: Vec::new(),
            stats: RoutingStats::default(),
        }
    }

    // === Accessors ===

    /// The local node.
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// Handshake state toward a neighbor. Unknown neighbors are `None`.
    pub fn link_state(&self, addr: &NodeAddr) -> LinkState {
        self.links.get(addr).copied().unwrap_or_default()
    }

    /// The local advertisement, if we have joined a mesh.
    pub fn local_lsa(&self) -> Option<&LinkStateAdvertisement> {
        self.database.get(self.local.addr())
    }

    /// The stored advertisement for an origin.
    pub fn lsa(&self, origin: &NodeAddr) -> Option<&LinkStateAdvertisement> {
        self.database.get(origin)
    }

    /// Direct neighbors listed in the local advertisement.
    pub fn neighbors(&self) -> Vec<Node> {
        self.local_lsa()
            .map(|lsa| lsa.neighbors.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every origin with a known advertisement, in address order.
    ///
    /// Includes the local node once it has joined.
    pub fn available_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.database.values().map(|l| l.origin.clone()).collect();
        nodes.sort();
        nodes
    }

    /// The last computed routing table.
    pub fn routing_table(&self) -> Option<&RoutingTable> {
        self.table.as_ref()
    }

    /// Engine counters.
    pub fn stats(&self) -> &RoutingStats {
        &self.stats
    }

    /// Take all queued transmissions, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Peek at queued transmissions without draining.
    pub fn outbox(&self) -> &[Outgoing] {
        &self.outbox
    }

    // === Application operations ===

    /// Start a handshake toward `node`.
    ///
    /// Sends `Hello` and moves to `HelloSent` from `None`; any other state
    /// is left untouched. Returns whether a `Hello` was queued.
    pub fn connect_to(&mut self, node: &Node) -> bool {
        if node == &self.local {
            debug!(node = %node, "Ignoring connect to self");
            return false;
        }
        let state = self.link_state(node.addr());
        if state != LinkState::None {
            debug!(peer = %node.display_name(), state = %state, "Connect ignored, handshake already underway");
            return false;
        }

        debug!(peer = %node.display_name(), "Sending Hello");
        self.send(*node.addr(), RoutingMessage::Hello(self.local.clone()));
        self.links.insert(*node.addr(), LinkState::HelloSent);
        true
    }

    /// Drop the adjacency to `addr`, telling the neighbor first.
    ///
    /// The neighbor is sent `Quit` carrying its own identity, queued ahead
    /// of the updated local advertisement. It treats that as a protocol
    /// violation and keeps its side of the link until its own timeout
    /// policy purges us.
    ///
    /// Returns false for the local address and for peers with no link
    /// state, so removing a stranger never creates a local advertisement.
    pub fn remove_node(&mut self, addr: &NodeAddr) -> bool {
        if addr == self.local.addr() {
            warn!("Refusing to remove the local node");
            return false;
        }
        let listed = self
            .local_lsa()
            .and_then(|lsa| lsa.neighbors.get(&Node::anonymous(*addr)))
            .cloned();
        if listed.is_none() && self.link_state(addr) == LinkState::None {
            debug!(peer = %addr, "Remove ignored, not a neighbor");
            return false;
        }

        info!(peer = %addr, "Removing neighbor");
        let node = listed.unwrap_or_else(|| Node::anonymous(*addr));
        self.send(*addr, RoutingMessage::Quit(node));
        self.purge_neighbor(addr);
        true
    }

    /// Tell every adjacent neighbor that we are leaving.
    ///
    /// Local state is not cleared. Returns the number of `Quit` messages
    /// queued.
    pub fn quit(&mut self) -> Result<usize, RoutingError> {
        let neighbors: Vec<NodeAddr> = match self.local_lsa() {
            Some(lsa) => lsa.neighbors.iter().map(|n| *n.addr()).collect(),
            None => return Err(RoutingError::NotJoined),
        };
        info!(neighbors = neighbors.len(), "Leaving mesh");
        for addr in &neighbors {
            self.send(*addr, RoutingMessage::Quit(self.local.clone()));
        }
        Ok(neighbors.len())
    }

    // === Message handling ===

    /// Process one routing message received from a direct neighbor.
    pub fn handle_message(&mut self, message: RoutingMessage) {
        trace!(msg = %message, "Routing message");
        match message {
            RoutingMessage::Hello(node) => self.handle_hello(node),
            RoutingMessage::HelloAck(node) => self.handle_hello_ack(node),
            RoutingMessage::LinkStateAdvertisement(lsa) => {
                self.handle_new_lsa(lsa);
            }
            RoutingMessage::Quit(node) => self.handle_quit(node),
        }
    }

    fn handle_hello(&mut self, node: Node) {
        if node == self.local {
            self.violation("Hello", &node, LinkState::None);
            return;
        }
        match self.link_state(node.addr()) {
            LinkState::None => {
                self.connect_to(&node);
            }
            LinkState::HelloSent => {
                self.send(*node.addr(), RoutingMessage::HelloAck(self.local.clone()));
                self.links.insert(*node.addr(), LinkState::FullyConnected);
                self.handshake_finished(node);
            }
            state => self.violation("Hello", &node, state),
        }
    }

    fn handle_hello_ack(&mut self, node: Node) {
        match self.link_state(node.addr()) {
            LinkState::HelloSent => {
                self.links.insert(*node.addr(), LinkState::FullyConnected);
                self.handshake_finished(node);
            }
            state => self.violation("HelloAck", &node, state),
        }
    }

    fn handle_quit(&mut self, node: Node) {
        match self.link_state(node.addr()) {
            LinkState::FullyConnected => {
                info!(peer = %node.display_name(), "Neighbor quit");
                self.purge_neighbor(node.addr());
            }
            state => self.violation("Quit", &node, state),
        }
    }

    /// Adjacency to `node` is now bidirectional.
    fn handshake_finished(&mut self, node: Node) {
        info!(peer = %node.display_name(), "Handshake complete");
        self.stats.handshakes_completed += 1;

        let peer = *node.addr();
        let local = self.bump_local_lsa();
        local.neighbors.replace(node);
        let snapshot = local.clone();
        self.flood(&snapshot);

        // Database sync: everything the neighbor did not originate itself.
        let mut origins: Vec<NodeAddr> = self
            .database
            .keys()
            .filter(|origin| **origin != peer)
            .copied()
            .collect();
        origins.sort();
        for origin in origins {
            if let Some(lsa) = self.database.get(&origin).cloned() {
                self.send(peer, RoutingMessage::LinkStateAdvertisement(lsa));
            }
        }

        self.recompute_routing_table();
    }

    /// Consider an advertisement for the database.
    ///
    /// Accepted iff the origin is unknown or the sequence is strictly newer
    /// than the stored one. Accepted advertisements are re-flooded unchanged
    /// to the local neighbors and trigger a recomputation. Returns whether
    /// the advertisement was accepted.
    pub fn handle_new_lsa(&mut self, lsa: LinkStateAdvertisement) -> bool {
        if lsa.origin == self.local {
            return self.handle_own_lsa(lsa);
        }

        if let Some(stored) = self.database.get(lsa.origin.addr())
            && !lsa.is_newer_than(stored)
        {
            debug!(
                origin = %lsa.origin,
                sequence = lsa.sequence,
                stored = stored.sequence,
                "Dropping stale LSA"
            );
            self.stats.lsas_stale += 1;
            return false;
        }

        debug!(origin = %lsa.origin, sequence = lsa.sequence, neighbors = lsa.neighbors.len(), "Accepted LSA");
        self.stats.lsas_accepted += 1;
        self.flood(&lsa);
        self.database.insert(*lsa.origin.addr(), lsa);
        self.recompute_routing_table();
        true
    }

    /// A copy of our own advertisement came back.
    ///
    /// A higher sequence than ours means a previous incarnation of this node
    /// is still circulating; jump past it and re-advertise the current state.
    fn handle_own_lsa(&mut self, lsa: LinkStateAdvertisement) -> bool {
        let current = self.local_lsa().map(|l| l.sequence);
        if current.is_some_and(|seq| seq >= lsa.sequence) || lsa.sequence < self.sequence_floor {
            trace!(sequence = lsa.sequence, "Own LSA echoed back");
            self.stats.lsas_stale += 1;
            return false;
        }

        warn!(
            sequence = lsa.sequence,
            current = ?current,
            "Received newer LSA for the local node; advancing sequence"
        );
        self.sequence_floor = lsa.sequence.saturating_add(1);
        let floor = self.sequence_floor;
        if let Some(own) = self.database.get_mut(self.local.addr()) {
            own.sequence = floor;
            let snapshot = own.clone();
            self.flood(&snapshot);
        }
        false
    }

    /// Rebuild the routing table from the current database.
    pub fn recompute_routing_table(&mut self) {
        let table = RoutingTable::compute(&self.local, &self.database);
        debug!(
            destinations = table.len(),
            lsas = self.database.len(),
            "Recomputed routing table"
        );
        self.stats.recomputations += 1;
        self.table = Some(table);
    }

    // === Internals ===

    fn send(&mut self, to: NodeAddr, message: RoutingMessage) {
        self.outbox.push(Outgoing { to, message });
    }

    /// Queue an advertisement to every neighbor in the local advertisement.
    fn flood(&mut self, lsa: &LinkStateAdvertisement) {
        let neighbors: Vec<NodeAddr> = match self.local_lsa() {
            Some(local) => local.neighbors.iter().map(|n| *n.addr()).collect(),
            None => return,
        };
        for to in neighbors {
            self.send(to, RoutingMessage::LinkStateAdvertisement(lsa.clone()));
        }
    }

    /// Create the local advertisement or advance its sequence.
    fn bump_local_lsa(&mut self) -> &mut LinkStateAdvertisement {
        let floor = self.sequence_floor;
        let local = self.local.clone();
        let lsa = self
            .database
            .entry(*local.addr())
            .and_modify(|lsa| lsa.sequence = lsa.sequence.saturating_add(1).max(floor))
            .or_insert_with(|| LinkStateAdvertisement::new(local, floor));
        self.sequence_floor = lsa.sequence.saturating_add(1);
        lsa
    }

    /// Forget a neighbor and re-advertise.
    fn purge_neighbor(&mut self, addr: &NodeAddr) {
        let local = self.bump_local_lsa();
        local.neighbors.remove(&Node::anonymous(*addr));
        let snapshot = local.clone();

        self.links.remove(addr);
        self.database.remove(addr);
        self.flood(&snapshot);
        self.recompute_routing_table();
    }

    fn violation(&mut self, kind: &'static str, from: &Node, state: LinkState) {
        warn!(
            kind,
            peer = %from.display_name(),
            state = %state,
            "Protocol violation, discarding"
        );
        self.stats.protocol_violations += 1;
    }
}

impl fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("local", &self.local)
            .field("links", &self.links.len())
            .field("lsas", &self.database.len())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}
