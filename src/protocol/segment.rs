//! Transport segment framing.
//!
//! A segment tags its payload with a transport kind. Only datagram segments
//! carry a port header; stream segments are accepted as a framing kind and
//! passed through opaque.
//!
//! ## Wire Format
//!
//! ```text
//! [kind:1] 0x01 datagram, 0x02 stream
//! datagram: [kind:1][src_port:2 LE][dst_port:2 LE][len:2 LE][payload:len]
//! stream:   [kind:1][opaque...]
//! ```

use std::fmt;

use super::wire::WireReader;
use super::ProtocolError;

/// Size of the datagram header including the kind byte.
pub const DATAGRAM_HEADER_SIZE: usize = 7;

/// Largest datagram payload the length field can describe.
pub const MAX_DATAGRAM_PAYLOAD: usize = u16::MAX as usize;

/// Transport kind of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentKind {
    /// Unreliable, port-addressed datagram.
    Datagram = 0x01,
    /// Stream-oriented segment (framing only).
    Stream = 0x02,
}

impl SegmentKind {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(SegmentKind::Datagram),
            0x02 => Some(SegmentKind::Stream),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Datagram => "datagram",
            SegmentKind::Stream => "stream",
        };
        write!(f, "{}", name)
    }
}

/// A port-addressed datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// Port of the sending socket (0 if unbound).
    pub src_port: u16,
    /// Port of the receiving socket.
    pub dst_port: u16,
    /// Opaque application payload.
    pub payload: Vec<u8>,
}

impl Datagram {
    /// Create a new datagram.
    pub fn new(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        Self {
            src_port,
            dst_port,
            payload,
        }
    }
}

/// One transport-layer unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Datagram(Datagram),
    Stream(Vec<u8>),
}

impl Segment {
    /// Build a datagram segment.
    pub fn datagram(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        Segment::Datagram(Datagram::new(src_port, dst_port, payload))
    }

    /// The kind tag of this segment.
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Datagram(_) => SegmentKind::Datagram,
            Segment::Stream(_) => SegmentKind::Stream,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Segment::Datagram(dg) => {
                if dg.payload.len() > MAX_DATAGRAM_PAYLOAD {
                    return Err(ProtocolError::MessageTooLong {
                        max: MAX_DATAGRAM_PAYLOAD,
                        got: dg.payload.len(),
                    });
                }
                let mut buf = Vec::with_capacity(DATAGRAM_HEADER_SIZE + dg.payload.len());
                buf.push(SegmentKind::Datagram.to_byte());
                buf.extend_from_slice(&dg.src_port.to_le_bytes());
                buf.extend_from_slice(&dg.dst_port.to_le_bytes());
                buf.extend_from_slice(&(dg.payload.len() as u16).to_le_bytes());
                buf.extend_from_slice(&dg.payload);
                Ok(buf)
            }
            Segment::Stream(data) => {
                let mut buf = Vec::with_capacity(1 + data.len());
                buf.push(SegmentKind::Stream.to_byte());
                buf.extend_from_slice(data);
                Ok(buf)
            }
        }
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(data);
        let kind_byte = r.u8()?;
        let kind =
            SegmentKind::from_byte(kind_byte).ok_or(ProtocolError::InvalidSegmentKind(kind_byte))?;

        match kind {
            SegmentKind::Datagram => {
                let src_port = r.u16()?;
                let dst_port = r.u16()?;
                let len = r.u16()? as usize;
                let payload = r.take(len)?.to_vec();
                if r.remaining() != 0 {
                    return Err(ProtocolError::Malformed(format!(
                        "{} trailing bytes after datagram payload",
                        r.remaining()
                    )));
                }
                Ok(Segment::Datagram(Datagram {
                    src_port,
                    dst_port,
                    payload,
                }))
            }
            SegmentKind::Stream => Ok(Segment::Stream(r.rest().to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_kind_bytes() {
        assert_eq!(SegmentKind::from_byte(0x01), Some(SegmentKind::Datagram));
        assert_eq!(SegmentKind::from_byte(0x02), Some(SegmentKind::Stream));
        assert!(SegmentKind::from_byte(0x00).is_none());
        assert!(SegmentKind::from_byte(0x03).is_none());
    }

    #[test]
    fn test_datagram_layout() {
        let seg = Segment::datagram(7, 50000, vec![0xAA, 0xBB, 0xCC]);
        let encoded = seg.encode().unwrap();

        assert_eq!(encoded.len(), DATAGRAM_HEADER_SIZE + 3);
        assert_eq!(encoded[0], 0x01);
        assert_eq!(u16::from_le_bytes([encoded[1], encoded[2]]), 7);
        assert_eq!(u16::from_le_bytes([encoded[3], encoded[4]]), 50000);
        assert_eq!(u16::from_le_bytes([encoded[5], encoded[6]]), 3);
        assert_eq!(&encoded[7..], &[0xAA, 0xBB, 0xCC]);

        assert_eq!(Segment::decode(&encoded).unwrap(), seg);
    }

    #[test]
    fn test_stream_passthrough() {
        let seg = Segment::Stream(vec![1, 2, 3]);
        let encoded = seg.encode().unwrap();
        assert_eq!(encoded, vec![0x02, 1, 2, 3]);
        assert_eq!(Segment::decode(&encoded).unwrap().kind(), SegmentKind::Stream);
    }

    #[test]
    fn test_decode_unknown_kind() {
        assert!(matches!(
            Segment::decode(&[0x7F, 0, 0]),
            Err(ProtocolError::InvalidSegmentKind(0x7F))
        ));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(Segment::decode(&[]).is_err());
        assert!(Segment::decode(&[0x01, 0, 0, 0]).is_err());
        // Length says 4 bytes, only 2 present.
        assert!(Segment::decode(&[0x01, 0, 0, 0, 0, 4, 0, 1, 2]).is_err());
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut encoded = Segment::datagram(1, 2, vec![9]).encode().unwrap();
        encoded.push(0xFF);
        assert!(matches!(
            Segment::decode(&encoded),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_oversized_payload() {
        let seg = Segment::datagram(1, 2, vec![0; MAX_DATAGRAM_PAYLOAD + 1]);
        assert!(matches!(
            seg.encode(),
            Err(ProtocolError::MessageTooLong { .. })
        ));
    }
}
