//! In-memory adapter for simulations.
//!
//! A `MemoryNetwork` is a hub that endpoints attach to under a transport
//! address. Each endpoint gets the same channel pair a real adapter hands
//! the mesh: a packet receiver and an outbound sender. A writer task per
//! endpoint moves outbound frames into the destination's packet channel.
//!
//! A network created with `sparse()` only delivers between pairs joined
//! with `link()`, which models radio range.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{
    outbound_channel, packet_channel, OutboundRx, OutboundTx, PacketRx, PacketTx, ReceivedPacket,
    TransportAddr,
};

/// Delivery counters for the whole network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Frames handed to a destination endpoint.
    pub delivered: u64,
    /// Frames with no attached destination.
    pub unknown_destination: u64,
    /// Frames between endpoints that are not linked.
    pub out_of_range: u64,
    /// Frames dropped because the destination queue was full or closed.
    pub queue_full: u64,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<TransportAddr, PacketTx>,
    /// Allowed pairs; `None` means everyone hears everyone.
    links: Option<HashSet<(TransportAddr, TransportAddr)>>,
    stats: MemoryStats,
}

impl Hub {
    fn in_range(&self, from: &TransportAddr, to: &TransportAddr) -> bool {
        match &self.links {
            None => true,
            Some(links) => links.contains(&(from.clone(), to.clone())),
        }
    }
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

/// One attached endpoint: the channel ends a mesh runtime consumes.
pub struct MemoryEndpoint {
    /// Address other endpoints use to reach this one.
    pub addr: TransportAddr,
    /// Frames received by this endpoint.
    pub packet_rx: PacketRx,
    /// Queue for frames sent by this endpoint.
    pub outbound_tx: OutboundTx,
    writer: JoinHandle<()>,
}

impl MemoryEndpoint {
    /// Split into the channel ends, leaving the writer task running.
    pub fn into_channels(self) -> (PacketRx, OutboundTx) {
        (self.packet_rx, self.outbound_tx)
    }

    /// Check whether the writer task has exited.
    pub fn is_finished(&self) -> bool {
        self.writer.is_finished()
    }
}

impl MemoryNetwork {
    /// Create a network where every endpoint reaches every other.
    pub fn full() -> Self {
        Self::default()
    }

    /// Create a network that only delivers between linked endpoints.
    pub fn sparse() -> Self {
        let hub = Hub {
            links: Some(HashSet::new()),
            ..Hub::default()
        };
        Self {
            hub: Arc::new(Mutex::new(hub)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        match self.hub.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allow frames in both directions between `a` and `b`.
    ///
    /// No effect on a fully connected network.
    pub fn link(&self, a: &TransportAddr, b: &TransportAddr) {
        let mut hub = self.lock();
        if let Some(links) = hub.links.as_mut() {
            links.insert((a.clone(), b.clone()));
            links.insert((b.clone(), a.clone()));
        }
    }

    /// Remove the link between `a` and `b`.
    pub fn unlink(&self, a: &TransportAddr, b: &TransportAddr) {
        let mut hub = self.lock();
        if let Some(links) = hub.links.as_mut() {
            links.remove(&(a.clone(), b.clone()));
            links.remove(&(b.clone(), a.clone()));
        }
    }

    /// Attach an endpoint. Must be called inside a tokio runtime.
    ///
    /// Re-attaching an address replaces the previous endpoint's receiver.
    pub fn attach(&self, addr: impl Into<TransportAddr>, buffer: usize) -> MemoryEndpoint {
        let addr = addr.into();
        let (packet_tx, packet_rx) = packet_channel(buffer);
        let (outbound_tx, outbound_rx) = outbound_channel(buffer);

        self.lock().endpoints.insert(addr.clone(), packet_tx);
        debug!(addr = %addr, "Memory endpoint attached");

        let writer = tokio::spawn(memory_writer_loop(self.clone(), addr.clone(), outbound_rx));
        MemoryEndpoint {
            addr,
            packet_rx,
            outbound_tx,
            writer,
        }
    }

    /// Detach an endpoint; frames to it are dropped from now on.
    pub fn detach(&self, addr: &TransportAddr) {
        self.lock().endpoints.remove(addr);
        debug!(addr = %addr, "Memory endpoint detached");
    }

    /// Number of attached endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.lock().endpoints.len()
    }

    /// Snapshot of delivery counters.
    pub fn stats(&self) -> MemoryStats {
        self.lock().stats.clone()
    }

    fn deliver(&self, from: &TransportAddr, to: &TransportAddr, data: Vec<u8>) {
        let mut hub = self.lock();
        if !hub.in_range(from, to) {
            trace!(from = %from, to = %to, "Destination out of range");
            hub.stats.out_of_range += 1;
            return;
        }
        let Some(tx) = hub.endpoints.get(to) else {
            trace!(from = %from, to = %to, "Unknown destination");
            hub.stats.unknown_destination += 1;
            return;
        };
        match tx.try_send(ReceivedPacket::new(from.clone(), data)) {
            Ok(()) => hub.stats.delivered += 1,
            Err(_) => {
                debug!(from = %from, to = %to, "Destination queue unavailable, dropping frame");
                hub.stats.queue_full += 1;
            }
        }
    }
}

/// Writer loop for one endpoint; exits when the outbound sender is dropped.
async fn memory_writer_loop(network: MemoryNetwork, from: TransportAddr, mut outbound_rx: OutboundRx) {
    while let Some(packet) = outbound_rx.recv().await {
        network.deliver(&from, &packet.remote_addr, packet.data);
    }
    trace!(addr = %from, "Memory writer loop stopped");
}
