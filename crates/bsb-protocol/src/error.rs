//! Error types for BSB framing, encoding and validation

use thiserror::Error;

/// Errors that can occur while parsing frames from the line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is incomplete - need more data
    #[error("incomplete frame: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Invalid frame structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Unknown packet type byte
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    /// Checksum mismatch
    #[error("checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// A value or field identifier was rejected before transmission
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidateError {
    /// Field id is not in the field table
    #[error("unknown field: {0}")]
    UnknownField(u32),

    /// Field cannot be written
    #[error("field {0} is read-only")]
    ReadOnly(u32),

    /// Value outside the field's allowed range
    #[error("value {value} out of range for field {field} ({min}..={max})")]
    OutOfRange {
        field: u32,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Value kind does not match the field kind
    #[error("field {field} expects a {expected} value")]
    WrongKind { field: u32, expected: &'static str },

    /// Field does not accept a null value
    #[error("field {0} does not accept null")]
    NullNotAllowed(u32),

    /// Choice value not among the field's options
    #[error("choice {choice} is not an option of field {field}")]
    UnknownChoice { field: u32, choice: u8 },

    /// Text could not be parsed as a value for the field
    #[error("cannot parse {text:?} as a value for field {field}")]
    Unparseable { field: u32, text: String },
}

/// A value cannot be represented on the wire
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Value does not fit the field's wire width
    #[error("value {value} cannot be represented by field {field}")]
    Unrepresentable { field: u32, value: String },

    /// Payload exceeds the maximum frame length
    #[error("payload of {0} bytes exceeds the maximum frame length")]
    PayloadTooLong(usize),
}

/// A received payload could not be turned into a value
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload length does not match the field kind
    #[error("field {field}: expected {expected} payload bytes, got {actual}")]
    Length {
        field: u32,
        expected: usize,
        actual: usize,
    },

    /// Leading flag byte is not a known value
    #[error("field {field}: unknown payload flag 0x{flag:02X}")]
    UnknownFlag { field: u32, flag: u8 },
}
