//! Decoded telegrams

use std::fmt;
use std::time::SystemTime;

use crate::field::{FieldTable, FieldValue};
use crate::frame::Frame;
use crate::packet::PacketType;

/// One decoded bus transaction
///
/// Produced from a [`Frame`] plus the field table; immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Telegram {
    /// Sender address
    pub src: u8,
    /// Receiver address
    pub dst: u8,
    /// Transaction kind
    pub packet_type: PacketType,
    /// Field identifier
    pub field_id: u32,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Decoded value (only for value-carrying packets of known fields)
    pub value: Option<FieldValue>,
    /// Wall-clock time the carrying chunk was read
    pub timestamp: SystemTime,
}

impl Telegram {
    /// Decode a frame against the field table
    ///
    /// Payload decoding failures leave `value` empty; the raw payload is
    /// always kept.
    pub fn from_frame(frame: Frame, table: &FieldTable, timestamp: SystemTime) -> Self {
        let value = match frame.packet_type {
            PacketType::Ret | PacketType::Set | PacketType::Inf if !frame.payload.is_empty() => {
                table.get(frame.field_id).and_then(|field| {
                    field
                        .decode(&frame.payload)
                        .map_err(|e| tracing::debug!("Undecodable payload: {}", e))
                        .ok()
                })
            }
            _ => None,
        };

        Self {
            src: frame.src,
            dst: frame.dst,
            packet_type: frame.packet_type,
            field_id: frame.field_id,
            payload: frame.payload,
            value,
            timestamp,
        }
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}->{:02X} {} {}",
            self.src, self.dst, self.packet_type, self.field_id
        )?;
        if let Some(value) = &self.value {
            write!(f, " = {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::demo_table;

    #[test]
    fn test_ret_value_decoded() {
        let table = demo_table();
        let frame = Frame::new(0x00, 0x44, PacketType::Ret, 8700, vec![0x00, 0xFF, 0xE0]);
        let telegram = Telegram::from_frame(frame, &table, SystemTime::UNIX_EPOCH);
        assert_eq!(telegram.value, Some(FieldValue::Decimal(-3.2)));
        assert_eq!(telegram.to_string(), "00->44 ret 8700 = -3.2");
    }

    #[test]
    fn test_unknown_field_keeps_payload() {
        let table = demo_table();
        let frame = Frame::new(0x00, 0x44, PacketType::Ret, 4242, vec![0x00, 0x01]);
        let telegram = Telegram::from_frame(frame, &table, SystemTime::UNIX_EPOCH);
        assert_eq!(telegram.value, None);
        assert_eq!(telegram.payload, vec![0x00, 0x01]);
    }

    #[test]
    fn test_ack_has_no_value() {
        let table = demo_table();
        let frame = Frame::new(0x00, 0x44, PacketType::Ack, 710, Vec::new());
        let telegram = Telegram::from_frame(frame, &table, SystemTime::UNIX_EPOCH);
        assert_eq!(telegram.value, None);
    }
}
