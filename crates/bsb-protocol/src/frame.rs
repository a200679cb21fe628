//! Frame codec
//!
//! Frame layout (all multi-byte values big endian):
//!
//! ```text
//! 0xDC | src ^ 0x80 | dst | len | type | field id (4) | payload ... | crc16 (2)
//! ```
//!
//! `len` counts the whole frame including the checksum. The checksum is
//! CRC-16/XMODEM over every byte before it.

use tracing::warn;

use crate::error::{EncodeError, ParseError};
use crate::packet::PacketType;

/// Start-of-frame marker
pub const START: u8 = 0xDC;

/// Bytes of framing around the payload
pub const HEADER_LEN: usize = 9;

/// Shortest possible frame (no payload)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 2;

/// Longest possible frame (length is a single byte)
pub const MAX_FRAME_LEN: usize = u8::MAX as usize;

/// CRC-16/XMODEM (poly 0x1021, init 0x0000)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// One framed bus transaction, before field decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender address
    pub src: u8,
    /// Receiver address
    pub dst: u8,
    /// Transaction kind
    pub packet_type: PacketType,
    /// Field identifier
    pub field_id: u32,
    /// Raw payload (flag byte followed by value bytes, or empty)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame
    pub fn new(src: u8, dst: u8, packet_type: PacketType, field_id: u32, payload: Vec<u8>) -> Self {
        Self {
            src,
            dst,
            packet_type,
            field_id,
            payload,
        }
    }

    /// Encode this frame to its wire format
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let len = MIN_FRAME_LEN + self.payload.len();
        if len > MAX_FRAME_LEN {
            return Err(EncodeError::PayloadTooLong(self.payload.len()));
        }

        let mut out = Vec::with_capacity(len);
        out.push(START);
        out.push(self.src ^ 0x80);
        out.push(self.dst);
        out.push(len as u8);
        out.push(self.packet_type.to_byte());
        out.extend_from_slice(&self.field_id.to_be_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }

    /// Parse exactly one complete frame
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(ParseError::Incomplete {
                needed: MIN_FRAME_LEN - bytes.len(),
            });
        }
        if bytes[0] != START {
            return Err(ParseError::InvalidFrame("missing start byte".into()));
        }

        let len = bytes[3] as usize;
        if len < MIN_FRAME_LEN {
            return Err(ParseError::InvalidFrame(format!("length field {len} too short")));
        }
        if bytes.len() < len {
            return Err(ParseError::Incomplete {
                needed: len - bytes.len(),
            });
        }
        if bytes.len() > len {
            return Err(ParseError::InvalidFrame(format!(
                "{} trailing bytes",
                bytes.len() - len
            )));
        }

        let expected = crc16(&bytes[..len - 2]);
        let actual = u16::from_be_bytes([bytes[len - 2], bytes[len - 1]]);
        if expected != actual {
            return Err(ParseError::ChecksumMismatch { expected, actual });
        }

        let packet_type = PacketType::from_byte(bytes[4])?;
        let field_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

        Ok(Self {
            src: bytes[1] ^ 0x80,
            dst: bytes[2],
            packet_type,
            field_id,
            payload: bytes[HEADER_LEN..len - 2].to_vec(),
        })
    }
}

/// Streaming frame decoder
///
/// Bytes may arrive in arbitrary chunks; complete frames are extracted as soon
/// as they are buffered. Garbage, bad lengths and checksum failures cause the
/// decoder to skip one byte and hunt for the next start marker.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: Vec<u8>,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Push raw bytes into the codec buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        if self.buffer.len() > MAX_FRAME_LEN * 4 {
            let start = self.buffer.len() - MAX_FRAME_LEN;
            self.buffer.drain(..start);
        }
    }

    /// Extract the next complete frame, if available
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.next_frame_with_bytes().map(|(frame, _)| frame)
    }

    /// Extract the next complete frame along with its raw bytes
    pub fn next_frame_with_bytes(&mut self) -> Option<(Frame, Vec<u8>)> {
        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == START) else {
                self.buffer.clear();
                return None;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            // Need the length byte
            if self.buffer.len() < 4 {
                return None;
            }
            let len = self.buffer[3] as usize;
            if len < MIN_FRAME_LEN {
                warn!("Discarding frame candidate with length {}", len);
                self.buffer.drain(..1);
                continue;
            }
            if self.buffer.len() < len {
                return None;
            }

            match Frame::parse(&self.buffer[..len]) {
                Ok(frame) => {
                    let raw: Vec<u8> = self.buffer.drain(..len).collect();
                    return Some((frame, raw));
                }
                Err(e) => {
                    warn!("Failed to parse frame: {}", e);
                    self.buffer.drain(..1);
                }
            }
        }
    }

    /// Number of buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
