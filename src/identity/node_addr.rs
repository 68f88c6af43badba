//! 6-byte radio device address.

use std::fmt;
use std::str::FromStr;

use super::IdentityError;

/// Size of a device address in bytes.
pub const NODE_ADDR_SIZE: usize = 6;

/// 6-byte device address in the usual `AA:BB:CC:DD:EE:FF` notation.
///
/// This is the stable key for a peer: every map in the routing engine and
/// the multiplexer is keyed by it, and ordering by address drives the
/// deterministic tie-breaks in shortest-path computation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddr([u8; NODE_ADDR_SIZE]);

impl NodeAddr {
    /// Create a NodeAddr from a 6-byte array.
    pub fn from_bytes(bytes: [u8; NODE_ADDR_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a NodeAddr from a slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self, IdentityError> {
        if slice.len() != NODE_ADDR_SIZE {
            return Err(IdentityError::InvalidAddrLength(slice.len()));
        }
        let mut bytes = [0u8; NODE_ADDR_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Generate a random locally administered unicast address.
    ///
    /// Used when no address is configured, e.g. for simulations over UDP
    /// where there is no radio hardware to read one from.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NODE_ADDR_SIZE];
        rand::Rng::fill(&mut rand::rng(), &mut bytes);
        // Locally administered, unicast.
        bytes[0] = (bytes[0] | 0x02) & 0xFE;
        Self(bytes)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ADDR_SIZE] {
        &self.0
    }
}

impl FromStr for NodeAddr {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; NODE_ADDR_SIZE];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| IdentityError::InvalidAddr(s.to_string()))?;
            if part.len() != 2 {
                return Err(IdentityError::InvalidAddr(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| IdentityError::InvalidAddr(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(IdentityError::InvalidAddr(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddr({})", self)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl AsRef<[u8]> for NodeAddr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
