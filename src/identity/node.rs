//! Peer identity: stable address plus display name.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::{IdentityError, NodeAddr, MAX_NAME_LEN};

/// A peer on the mesh.
///
/// Immutable once constructed. Equality, ordering and hashing consider the
/// address only, so two `Node` values for the same device compare equal even
/// if they were learned with different display names.
#[derive(Clone)]
pub struct Node {
    addr: NodeAddr,
    name: String,
}

impl Node {
    /// Create a node, validating the display name length.
    pub fn new(addr: NodeAddr, name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(IdentityError::NameTooLong(name.len()));
        }
        Ok(Self { addr, name })
    }

    /// Create a node without a display name.
    pub fn anonymous(addr: NodeAddr) -> Self {
        Self {
            addr,
            name: String::new(),
        }
    }

    /// Parse an address string and create a node from it.
    pub fn parse(addr: &str, name: impl Into<String>) -> Result<Self, IdentityError> {
        Self::new(addr.parse()?, name)
    }

    /// The device address.
    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// The display name (may be empty).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name for log output: the display name if set, else the address.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.addr.to_string()
        } else {
            format!("{} ({})", self.name, self.addr)
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr.cmp(&other.addr)
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}, {:?})", self.addr, self.name)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

impl From<NodeAddr> for Node {
    fn from(addr: NodeAddr) -> Self {
        Self::anonymous(addr)
    }
}
