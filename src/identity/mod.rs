//! Peer Identity
//!
//! A peer is identified by its 6-byte radio device address. The display
//! name travels with the address in handshake and advertisement messages but
//! never takes part in comparisons.

mod node;
mod node_addr;

use thiserror::Error;

pub use node::Node;
pub use node_addr::{NodeAddr, NODE_ADDR_SIZE};

/// Longest display name that fits the one-byte length prefix on the wire.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid device address '{0}': expected six hex octets")]
    InvalidAddr(String),

    #[error("invalid address length: expected 6, got {0}")]
    InvalidAddrLength(usize),

    #[error("display name too long: max 255 bytes, got {0}")]
    NameTooLong(usize),
}
