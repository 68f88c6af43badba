//! Adapter configuration types (`transports.*`).

use serde::{Deserialize, Serialize};

/// Default UDP bind address.
const DEFAULT_UDP_BIND_ADDR: &str = "0.0.0.0:4000";

/// Default UDP MTU (IPv6 minimum).
const DEFAULT_UDP_MTU: u16 = 1280;

/// UDP adapter configuration (`transports.udp.*`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpConfig {
    /// Bind address (`bind_addr`). Defaults to "0.0.0.0:4000".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,

    /// Largest frame accepted or sent (`mtu`). Defaults to 1280.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

impl UdpConfig {
    /// Get the bind address, using default if not configured.
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_UDP_BIND_ADDR)
    }

    /// Get the MTU, using default if not configured.
    pub fn mtu(&self) -> u16 {
        self.mtu.unwrap_or(DEFAULT_UDP_MTU)
    }

    fn merge(&mut self, other: UdpConfig) {
        if other.bind_addr.is_some() {
            self.bind_addr = other.bind_addr;
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
    }
}

/// Transports configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportsConfig {
    /// UDP adapter; absent means the daemon starts no UDP adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<UdpConfig>,
}

impl TransportsConfig {
    /// Check if any adapters are configured.
    pub fn is_empty(&self) -> bool {
        self.udp.is_none()
    }

    /// Merge another TransportsConfig into this one, field by field.
    pub fn merge(&mut self, other: TransportsConfig) {
        match (self.udp.as_mut(), other.udp) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.udp = Some(theirs),
            (_, None) => {}
        }
    }
}
