//! Static peer configuration (`peers`).

use serde::{Deserialize, Serialize};

use crate::transport::TransportAddr;
use crate::{IdentityError, Node, NodeAddr};

/// When to run the handshake with a configured peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectPolicy {
    /// Connect as soon as the mesh starts.
    #[default]
    AutoConnect,
    /// Only remember the peer; the application connects explicitly.
    OnDemand,
}

/// A peer known ahead of time.
///
/// ```yaml
/// peers:
///   - address: "00:1A:7D:DA:71:13"
///     name: "gateway"
///     transport_addr: "192.168.1.1:4000"
///     connect_policy: auto_connect
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Device address (`AA:BB:CC:DD:EE:FF`).
    pub address: String,

    /// Display name used until the peer's own handshake supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Adapter address to reach the peer. Radio adapters use the device
    /// address itself, so this is only needed on UDP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_addr: Option<String>,

    #[serde(default)]
    pub connect_policy: ConnectPolicy,
}

impl PeerConfig {
    /// Create an auto-connect peer entry.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            transport_addr: None,
            connect_policy: ConnectPolicy::AutoConnect,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the adapter address.
    pub fn with_transport_addr(mut self, addr: impl Into<String>) -> Self {
        self.transport_addr = Some(addr.into());
        self
    }

    /// Set the connect policy.
    pub fn with_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    /// Check if this peer should be connected at startup.
    pub fn is_auto_connect(&self) -> bool {
        self.connect_policy == ConnectPolicy::AutoConnect
    }

    /// Parse the configured device address.
    pub fn node_addr(&self) -> Result<NodeAddr, IdentityError> {
        self.address.parse()
    }

    /// Build the peer's identity.
    pub fn node(&self) -> Result<Node, IdentityError> {
        let addr = self.node_addr()?;
        match &self.name {
            Some(name) => Node::new(addr, name.clone()),
            None => Ok(Node::anonymous(addr)),
        }
    }

    /// Adapter address, falling back to the device address text.
    pub fn transport_addr(&self) -> Result<TransportAddr, IdentityError> {
        match &self.transport_addr {
            Some(addr) => Ok(TransportAddr::from_string(addr)),
            None => Ok(TransportAddr::from_node_addr(&self.node_addr()?)),
        }
    }
}
