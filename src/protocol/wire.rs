//! Little-endian field reader and writers shared by the message codecs.

use super::ProtocolError;
use crate::identity::{Node, NodeAddr, NODE_ADDR_SIZE};

/// Cursor over a received buffer that fails with `MessageTooShort`
/// instead of panicking on truncated input.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::MessageTooShort {
                expected: self.pos + len,
                got: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Everything not yet consumed.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn node_addr(&mut self) -> Result<NodeAddr, ProtocolError> {
        Ok(NodeAddr::from_slice(self.take(NODE_ADDR_SIZE)?)?)
    }

    /// `[addr:6][name_len:1][name]`
    pub(crate) fn node(&mut self) -> Result<Node, ProtocolError> {
        let addr = self.node_addr()?;
        let name_len = self.u8()? as usize;
        let name = std::str::from_utf8(self.take(name_len)?)
            .map_err(|_| ProtocolError::InvalidUtf8("node name"))?;
        Ok(Node::new(addr, name)?)
    }
}

/// Append a node as `[addr:6][name_len:1][name]`.
///
/// `Node` construction already bounds the name to 255 bytes.
pub(crate) fn put_node(buf: &mut Vec<u8>, node: &Node) {
    buf.extend_from_slice(node.addr().as_bytes());
    buf.push(node.name().len() as u8);
    buf.extend_from_slice(node.name().as_bytes());
}

/// Encoded size of a node.
pub(crate) fn node_len(node: &Node) -> usize {
    NODE_ADDR_SIZE + 1 + node.name().len()
}
