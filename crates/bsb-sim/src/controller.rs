//! Virtual heating controller state

use std::collections::BTreeMap;
use std::sync::Arc;

use bsb_protocol::{FieldTable, FieldValue, Frame, PacketType};
use tracing::debug;

/// Plausible values for the demonstration table
pub fn demo_values() -> BTreeMap<u32, FieldValue> {
    BTreeMap::from([
        (700, FieldValue::Choice(1)),
        (710, FieldValue::Decimal(21.0)),
        (712, FieldValue::Decimal(18.0)),
        (1600, FieldValue::Choice(1)),
        (6225, FieldValue::Integer(162)),
        (8700, FieldValue::Decimal(4.5)),
        (8740, FieldValue::Decimal(20.5)),
        (8830, FieldValue::Decimal(48.0)),
    ])
}

/// A controller answering requests from its field values
#[derive(Debug, Clone)]
pub struct VirtualController {
    address: u8,
    table: Arc<FieldTable>,
    values: BTreeMap<u32, FieldValue>,
}

impl VirtualController {
    /// Controller at `address` with no values set
    pub fn new(address: u8, table: Arc<FieldTable>) -> Self {
        Self {
            address,
            table,
            values: BTreeMap::new(),
        }
    }

    /// Controller preloaded with [`demo_values`]
    pub fn with_demo_values(address: u8, table: Arc<FieldTable>) -> Self {
        Self {
            values: demo_values(),
            ..Self::new(address, table)
        }
    }

    /// Bus address of the controller
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Current value of a field
    pub fn value(&self, field_id: u32) -> Option<&FieldValue> {
        self.values.get(&field_id)
    }

    /// Overwrite a value, bypassing validation (read-only fields included)
    pub fn set_value(&mut self, field_id: u32, value: FieldValue) {
        self.values.insert(field_id, value);
    }

    /// Answer one frame; frames for other addresses and non-requests get no reply
    pub fn handle(&mut self, frame: &Frame) -> Option<Frame> {
        if frame.dst != self.address {
            return None;
        }

        let (packet_type, payload) = match frame.packet_type {
            PacketType::Get => self.answer_get(frame.field_id),
            PacketType::Set => self.answer_set(frame.field_id, &frame.payload),
            _ => return None,
        };
        debug!(
            "Controller answers {} {} with {}",
            frame.packet_type, frame.field_id, packet_type
        );
        Some(Frame::new(
            self.address,
            frame.src,
            packet_type,
            frame.field_id,
            payload,
        ))
    }

    fn answer_get(&self, field_id: u32) -> (PacketType, Vec<u8>) {
        let encoded = self
            .table
            .get(field_id)
            .zip(self.values.get(&field_id))
            .and_then(|(field, value)| field.encode(value).ok());
        match encoded {
            Some(payload) => (PacketType::Ret, payload),
            None => (PacketType::Err, Vec::new()),
        }
    }

    fn answer_set(&mut self, field_id: u32, payload: &[u8]) -> (PacketType, Vec<u8>) {
        let Some(field) = self.table.get(field_id) else {
            return (PacketType::Nack, Vec::new());
        };
        let accepted = field
            .decode(payload)
            .ok()
            .filter(|value| field.validate(value).is_ok());
        match accepted {
            Some(value) => {
                self.values.insert(field_id, value);
                (PacketType::Ack, Vec::new())
            }
            None => (PacketType::Nack, Vec::new()),
        }
    }
}
