//! Control-port envelope: a type tag followed by one typed body.
//!
//! Every datagram addressed to the control port carries exactly one
//! envelope. The tag enumeration is fixed and shared by every peer.
//!
//! | Tag  | Body                                            |
//! |------|-------------------------------------------------|
//! | 0x01 | Hello: `Node`                                   |
//! | 0x02 | HelloAck: `Node`                                |
//! | 0x03 | LinkStateAdvertisement: see `LinkStateAdvertisement` |
//! | 0x04 | Quit: `Node`                                    |
//! | 0x10 | Message: see `AppMessage`                       |

use std::fmt;

use super::routing::{LinkStateAdvertisement, RoutingMessage};
use super::wire::{node_len, put_node, WireReader};
use super::ProtocolError;
use crate::Node;

/// Envelope type identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeType {
    Hello = 0x01,
    HelloAck = 0x02,
    LinkStateAdvertisement = 0x03,
    Quit = 0x04,
    Message = 0x10,
}

impl EnvelopeType {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(EnvelopeType::Hello),
            0x02 => Some(EnvelopeType::HelloAck),
            0x03 => Some(EnvelopeType::LinkStateAdvertisement),
            0x04 => Some(EnvelopeType::Quit),
            0x10 => Some(EnvelopeType::Message),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this tag carries a routing-control message.
    pub fn is_routing(self) -> bool {
        !matches!(self, EnvelopeType::Message)
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeType::Hello => "Hello",
            EnvelopeType::HelloAck => "HelloAck",
            EnvelopeType::LinkStateAdvertisement => "LinkStateAdvertisement",
            EnvelopeType::Quit => "Quit",
            EnvelopeType::Message => "Message",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Application Message
// ============================================================================

/// A user-level message delivered through the control port.
///
/// ## Wire Format
///
/// ```text
/// [sender:Node][timestamp_secs:8 LE][text_len:4 LE][text][data_len:4 LE][data]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppMessage {
    /// Originating node (address plus the sender's user name).
    pub sender: Node,
    /// Unix time in seconds at which the sender created the message.
    pub timestamp: u64,
    /// Message text (may be empty).
    pub text: String,
    /// Opaque application object bytes (may be empty).
    pub data: Vec<u8>,
}

impl AppMessage {
    /// Create a text message.
    pub fn new(sender: Node, timestamp: u64, text: impl Into<String>) -> Self {
        Self {
            sender,
            timestamp,
            text: text.into(),
            data: Vec::new(),
        }
    }

    /// Attach opaque object bytes.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let longest = self.text.len().max(self.data.len());
        if longest > u32::MAX as usize {
            return Err(ProtocolError::MessageTooLong {
                max: u32::MAX as usize,
                got: longest,
            });
        }
        buf.reserve(node_len(&self.sender) + 16 + self.text.len() + self.data.len());
        put_node(buf, &self.sender);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.text.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.text.as_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        Ok(())
    }

    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let sender = r.node()?;
        let timestamp = r.u64()?;
        let text_len = r.u32()? as usize;
        let text = std::str::from_utf8(r.take(text_len)?)
            .map_err(|_| ProtocolError::InvalidUtf8("message text"))?
            .to_string();
        let data_len = r.u32()? as usize;
        let data = r.take(data_len)?.to_vec();
        Ok(Self {
            sender,
            timestamp,
            text,
            data,
        })
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Decoded control-port payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Routing(RoutingMessage),
    Message(AppMessage),
}

impl Envelope {
    /// The tag this envelope encodes with.
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Envelope::Routing(RoutingMessage::Hello(_)) => EnvelopeType::Hello,
            Envelope::Routing(RoutingMessage::HelloAck(_)) => EnvelopeType::HelloAck,
            Envelope::Routing(RoutingMessage::LinkStateAdvertisement(_)) => {
                EnvelopeType::LinkStateAdvertisement
            }
            Envelope::Routing(RoutingMessage::Quit(_)) => EnvelopeType::Quit,
            Envelope::Message(_) => EnvelopeType::Message,
        }
    }

    /// Encode to control-port payload bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![self.envelope_type().to_byte()];
        match self {
            Envelope::Routing(RoutingMessage::Hello(n))
            | Envelope::Routing(RoutingMessage::HelloAck(n))
            | Envelope::Routing(RoutingMessage::Quit(n)) => put_node(&mut buf, n),
            Envelope::Routing(RoutingMessage::LinkStateAdvertisement(lsa)) => {
                lsa.encode_into(&mut buf)?
            }
            Envelope::Message(msg) => msg.encode_into(&mut buf)?,
        }
        Ok(buf)
    }

    /// Decode from control-port payload bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(data);
        let tag = r.u8()?;
        let ty = EnvelopeType::from_byte(tag).ok_or(ProtocolError::InvalidMessageType(tag))?;

        let envelope = match ty {
            EnvelopeType::Hello => Envelope::Routing(RoutingMessage::Hello(r.node()?)),
            EnvelopeType::HelloAck => Envelope::Routing(RoutingMessage::HelloAck(r.node()?)),
            EnvelopeType::Quit => Envelope::Routing(RoutingMessage::Quit(r.node()?)),
            EnvelopeType::LinkStateAdvertisement => Envelope::Routing(
                RoutingMessage::LinkStateAdvertisement(LinkStateAdvertisement::decode_from(&mut r)?),
            ),
            EnvelopeType::Message => Envelope::Message(AppMessage::decode_from(&mut r)?),
        };

        if r.remaining() != 0 {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after {}",
                r.remaining(),
                ty
            )));
        }
        Ok(envelope)
    }
}

impl From<RoutingMessage> for Envelope {
    fn from(msg: RoutingMessage) -> Self {
        Envelope::Routing(msg)
    }
}

impl From<AppMessage> for Envelope {
    fn from(msg: AppMessage) -> Self {
        Envelope::Message(msg)
    }
}
