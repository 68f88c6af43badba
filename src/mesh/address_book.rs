//! Peer address book: which adapter address reaches each neighbor.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::transport::TransportAddr;
use crate::NodeAddr;

/// Map from device address to adapter address.
///
/// Entries come from configured peers, discovery, and the last-hop field of
/// inbound packets. Lookups for unknown peers fall back to the device
/// address in text form, which is what radio adapters use.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<NodeAddr, TransportAddr>,
    max_entries: usize,
}

impl AddressBook {
    /// Create an empty book holding at most `max_entries` peers.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Record an address. Returns false if the book is full and the peer
    /// is new.
    pub fn insert(&mut self, addr: NodeAddr, transport_addr: TransportAddr) -> bool {
        if !self.entries.contains_key(&addr) && self.entries.len() >= self.max_entries {
            debug!(peer = %addr, max = self.max_entries, "Address book full, not recording peer");
            return false;
        }
        match self.entries.insert(addr, transport_addr.clone()) {
            Some(old) if old != transport_addr => {
                debug!(peer = %addr, old = %old, new = %transport_addr, "Peer address changed");
            }
            Some(_) => {}
            None => {
                trace!(peer = %addr, transport_addr = %transport_addr, "Peer address recorded");
            }
        }
        true
    }

    /// Recorded address for `addr`.
    pub fn get(&self, addr: &NodeAddr) -> Option<&TransportAddr> {
        self.entries.get(addr)
    }

    /// Address to transmit to for `addr`, falling back to the device address.
    pub fn resolve(&self, addr: &NodeAddr) -> TransportAddr {
        match self.entries.get(addr) {
            Some(transport_addr) => transport_addr.clone(),
            None => TransportAddr::from_node_addr(addr),
        }
    }

    /// Number of recorded peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
