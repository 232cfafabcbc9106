//! Wire protocol codec for pmlink PDUs.
//!
//! Format: 12-byte header + bincode-encoded PDU body.
//!
//! Header layout (all little-endian u32):
//! - total frame length, including the header
//! - PDU type tag
//! - sender process id (correlation only; the protocol is synchronous)
//!
//! The codec ensures:
//! - Frames are self-delimiting for stream framing
//! - Maximum frame size is enforced on both sides
//! - Partial reads return Ok(None) without consuming anything
//! - The header tag must agree with the decoded body

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::MAX_PDU_SIZE;
use crate::error::{Error, Result};
use crate::protocol::Pdu;

/// Length of the frame header (3 little-endian u32 fields).
pub const FRAME_HEADER_LEN: usize = 12;

/// A decoded frame: the PDU plus its header correlation field.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub pdu: Pdu,
    /// Sender process id from the header.
    pub from: u32,
}

/// Codec for header-framed bincode encoding of PDUs.
pub struct Codec;

impl Codec {
    /// Encode a PDU to bytes, including the frame header.
    pub fn encode(pdu: &Pdu, from: u32) -> Result<Bytes> {
        let body = bincode::serialize(pdu).map_err(|e| Error::Codec {
            message: format!("serialization failed: {}", e),
        })?;

        let total = FRAME_HEADER_LEN + body.len();
        if total > MAX_PDU_SIZE {
            return Err(Error::Codec {
                message: format!("frame too large: {} bytes (max {})", total, MAX_PDU_SIZE),
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(pdu.tag());
        buf.put_u32_le(from);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    /// Decode a frame from a buffer.
    ///
    /// Returns:
    /// - Ok(Some(frame)) if a complete frame was decoded (buffer is advanced)
    /// - Ok(None) if more data is needed (buffer unchanged)
    /// - Err if the data is invalid
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        // Peek the total length without consuming.
        let total = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if total < FRAME_HEADER_LEN {
            return Err(Error::Codec {
                message: format!("frame length {} shorter than header", total),
            });
        }
        if total > MAX_PDU_SIZE {
            return Err(Error::Codec {
                message: format!("frame length {} exceeds maximum {}", total, MAX_PDU_SIZE),
            });
        }

        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(4);
        let tag = buf.get_u32_le();
        let from = buf.get_u32_le();

        let body = buf.split_to(total - FRAME_HEADER_LEN);
        let pdu: Pdu = bincode::deserialize(&body).map_err(|e| Error::Codec {
            message: format!("deserialization failed: {}", e),
        })?;

        if pdu.tag() != tag {
            return Err(Error::Codec {
                message: format!(
                    "header tag {} disagrees with {} body (tag {})",
                    tag,
                    pdu.kind_name(),
                    pdu.tag()
                ),
            });
        }

        Ok(Some(Frame { pdu, from }))
    }

    /// Decode from a slice (convenience for testing).
    pub fn decode_slice(data: &[u8]) -> Result<Option<Frame>> {
        let mut buf = BytesMut::from(data);
        Self::decode(&mut buf)
    }
}

// =============================================================================
// Tests
// =============================================================================
