//! Node configuration subsections.
//!
//! All the `node.*` configuration parameters: identity, the control port,
//! the hop limit, resource limits and internal buffers.

use serde::{Deserialize, Serialize};

use super::IdentityConfig;
use crate::protocol::{CONTROL_PORT, DEFAULT_TTL};

// ============================================================================
// Node Configuration Subsections
// ============================================================================

/// Resource limits (`node.limits.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Max open sockets (`node.limits.max_sockets`).
    #[serde(default = "LimitsConfig::default_max_sockets")]
    pub max_sockets: usize,
    /// Max address book entries (`node.limits.max_peers`).
    #[serde(default = "LimitsConfig::default_max_peers")]
    pub max_peers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sockets: 256,
            max_peers: 64,
        }
    }
}

impl LimitsConfig {
    fn default_max_sockets() -> usize { 256 }
    fn default_max_peers() -> usize { 64 }
}

/// Internal buffers (`node.buffers.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffersConfig {
    /// Adapter→mesh packet channel capacity (`node.buffers.packet_channel`).
    #[serde(default = "BuffersConfig::default_packet_channel")]
    pub packet_channel: usize,
    /// Mesh→adapter outbound channel capacity (`node.buffers.outbound_channel`).
    #[serde(default = "BuffersConfig::default_outbound_channel")]
    pub outbound_channel: usize,
    /// Handle→worker command channel capacity (`node.buffers.command_channel`).
    #[serde(default = "BuffersConfig::default_command_channel")]
    pub command_channel: usize,
    /// Event broadcast capacity (`node.buffers.event_channel`).
    #[serde(default = "BuffersConfig::default_event_channel")]
    pub event_channel: usize,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            packet_channel: 1024,
            outbound_channel: 1024,
            command_channel: 64,
            event_channel: 256,
        }
    }
}

impl BuffersConfig {
    fn default_packet_channel() -> usize { 1024 }
    fn default_outbound_channel() -> usize { 1024 }
    fn default_command_channel() -> usize { 64 }
    fn default_event_channel() -> usize { 256 }
}

// ============================================================================
// Node Configuration (Root)
// ============================================================================

/// Node configuration (`node.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity configuration (`node.identity.*`).
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Port reserved for routing control and messages (`node.control_port`).
    #[serde(default = "NodeConfig::default_control_port")]
    pub control_port: u16,

    /// Hop limit for originated packets (`node.default_ttl`).
    #[serde(default = "NodeConfig::default_ttl")]
    pub default_ttl: u8,

    /// Resource limits (`node.limits.*`).
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Internal buffers (`node.buffers.*`).
    #[serde(default)]
    pub buffers: BuffersConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            control_port: CONTROL_PORT,
            default_ttl: DEFAULT_TTL,
            limits: LimitsConfig::default(),
            buffers: BuffersConfig::default(),
        }
    }
}

impl NodeConfig {
    fn default_control_port() -> u16 { CONTROL_PORT }
    fn default_ttl() -> u8 { DEFAULT_TTL }
}
