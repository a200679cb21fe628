//! BSB Protocol Library
//!
//! This crate provides the wire-level building blocks for talking to a heating
//! controller over the BSB half-duplex serial bus:
//!
//! - **Frames**: a streaming codec that turns raw line bytes into framed
//!   transactions and back, resynchronizing on garbage or corrupt frames
//! - **Packet types**: the transaction kinds exchanged on the bus (`get`, `ret`,
//!   `set`, `ack`, ...)
//! - **Fields**: a field table describing how each field id encodes, decodes
//!   and validates its value
//! - **Telegrams**: a decoded, timestamped transaction ready for consumers
//!
//! # Example
//!
//! ```rust
//! use bsb_protocol::{Frame, FrameCodec, PacketType};
//!
//! let frame = Frame::new(0x42, 0x00, PacketType::Get, 8700, Vec::new());
//! let bytes = frame.encode().unwrap();
//!
//! let mut codec = FrameCodec::new();
//! codec.push_bytes(&bytes);
//!
//! let decoded = codec.next_frame().unwrap();
//! assert_eq!(decoded.field_id, 8700);
//! assert_eq!(decoded.packet_type, PacketType::Get);
//! ```

pub mod catalog;
pub mod error;
pub mod field;
pub mod frame;
pub mod packet;
pub mod telegram;

pub use catalog::demo_table;
pub use error::{DecodeError, EncodeError, ParseError, ValidateError};
pub use field::{Field, FieldKind, FieldTable, FieldValue};
pub use frame::{crc16, Frame, FrameCodec};
pub use packet::PacketType;
pub use telegram::Telegram;
