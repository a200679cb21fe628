//! Field model
//!
//! A field table maps field identifiers to the rules for turning values into
//! payload bytes and back. Payloads start with a flag byte: `0x00` means a
//! value follows, `0x01` means the field is unset (null).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{DecodeError, EncodeError, ValidateError};

const FLAG_VALUE: u8 = 0x00;
const FLAG_NULL: u8 = 0x01;

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum FieldValue {
    /// No value set
    Null,
    /// Whole number
    Integer(i64),
    /// Scaled number
    Decimal(f64),
    /// Enumerated option
    Choice(u8),
}

impl FieldValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Null => None,
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Decimal(v) => Some(*v),
            FieldValue::Choice(v) => Some(*v as f64),
        }
    }

    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("---"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Decimal(v) => write!(f, "{v:.1}"),
            FieldValue::Choice(v) => write!(f, "#{v}"),
        }
    }
}

/// Wire representation of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Unsigned single byte
    Byte,
    /// Signed 16-bit integer, divided by `divisor` for display
    Int16 {
        /// Scale of the raw value
        divisor: u16,
    },
    /// Enumerated single byte
    Choice {
        /// Option number to label
        options: BTreeMap<u8, String>,
    },
}

impl FieldKind {
    /// Number of value bytes following the flag byte
    pub fn width(&self) -> usize {
        match self {
            FieldKind::Byte | FieldKind::Choice { .. } => 1,
            FieldKind::Int16 { .. } => 2,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Byte => "integer",
            FieldKind::Int16 { .. } => "numeric",
            FieldKind::Choice { .. } => "choice",
        }
    }
}

/// One entry of the field table
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field identifier (also the display number)
    pub id: u32,
    /// Human-readable name
    pub name: String,
    /// Wire representation
    pub kind: FieldKind,
    /// Whether writes are refused
    pub readonly: bool,
    /// Whether null is an allowed value
    pub nullable: bool,
    /// Lowest allowed numeric value
    pub min: Option<f64>,
    /// Highest allowed numeric value
    pub max: Option<f64>,
}

impl Field {
    /// Create a writable, non-nullable field without range limits
    pub fn new(id: u32, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            readonly: false,
            nullable: false,
            min: None,
            max: None,
        }
    }

    /// Mark the field read-only
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Allow null values
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Restrict the numeric range
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Check that `value` may be written to this field
    pub fn validate(&self, value: &FieldValue) -> Result<(), ValidateError> {
        if self.readonly {
            return Err(ValidateError::ReadOnly(self.id));
        }
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(ValidateError::NullNotAllowed(self.id))
            };
        }

        match (&self.kind, value) {
            (FieldKind::Choice { options }, FieldValue::Choice(c)) => {
                if !options.contains_key(c) {
                    return Err(ValidateError::UnknownChoice {
                        field: self.id,
                        choice: *c,
                    });
                }
            }
            (FieldKind::Byte, FieldValue::Integer(_))
            | (FieldKind::Int16 { .. }, FieldValue::Integer(_) | FieldValue::Decimal(_)) => {}
            (kind, _) => {
                return Err(ValidateError::WrongKind {
                    field: self.id,
                    expected: kind.expected(),
                })
            }
        }

        if let Some(v) = value.as_f64() {
            let min = self.min.unwrap_or(f64::NEG_INFINITY);
            let max = self.max.unwrap_or(f64::INFINITY);
            if v < min || v > max {
                return Err(ValidateError::OutOfRange {
                    field: self.id,
                    value: v,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Encode `value` into payload bytes (flag byte included)
    pub fn encode(&self, value: &FieldValue) -> Result<Vec<u8>, EncodeError> {
        let unrepresentable = || EncodeError::Unrepresentable {
            field: self.id,
            value: value.to_string(),
        };

        if value.is_null() {
            let mut out = vec![FLAG_NULL];
            out.resize(1 + self.kind.width(), 0);
            return Ok(out);
        }

        match &self.kind {
            FieldKind::Byte | FieldKind::Choice { .. } => {
                let raw = match value {
                    FieldValue::Choice(c) => *c as i64,
                    FieldValue::Integer(v) => *v,
                    FieldValue::Decimal(v) if v.fract() == 0.0 => *v as i64,
                    _ => return Err(unrepresentable()),
                };
                let byte = u8::try_from(raw).map_err(|_| unrepresentable())?;
                Ok(vec![FLAG_VALUE, byte])
            }
            FieldKind::Int16 { divisor } => {
                let scaled = value.as_f64().ok_or_else(unrepresentable)? * (*divisor as f64);
                let rounded = scaled.round();
                if !(i16::MIN as f64..=i16::MAX as f64).contains(&rounded) {
                    return Err(unrepresentable());
                }
                let raw = (rounded as i16).to_be_bytes();
                Ok(vec![FLAG_VALUE, raw[0], raw[1]])
            }
        }
    }

    /// Decode payload bytes (flag byte included) into a value
    pub fn decode(&self, payload: &[u8]) -> Result<FieldValue, DecodeError> {
        let expected = 1 + self.kind.width();
        if payload.len() != expected {
            return Err(DecodeError::Length {
                field: self.id,
                expected,
                actual: payload.len(),
            });
        }

        match payload[0] {
            FLAG_NULL => return Ok(FieldValue::Null),
            FLAG_VALUE => {}
            flag => {
                return Err(DecodeError::UnknownFlag {
                    field: self.id,
                    flag,
                })
            }
        }

        Ok(match &self.kind {
            FieldKind::Byte => FieldValue::Integer(payload[1] as i64),
            FieldKind::Choice { .. } => FieldValue::Choice(payload[1]),
            FieldKind::Int16 { divisor } => {
                let raw = i16::from_be_bytes([payload[1], payload[2]]);
                if *divisor <= 1 {
                    FieldValue::Integer(raw as i64)
                } else {
                    FieldValue::Decimal(raw as f64 / *divisor as f64)
                }
            }
        })
    }

    /// Parse user-entered text as a value of this field
    ///
    /// Accepts `null` / `---`, numbers, and choice labels (case-insensitive).
    pub fn parse_value(&self, text: &str) -> Result<FieldValue, ValidateError> {
        let text = text.trim();
        let unparseable = || ValidateError::Unparseable {
            field: self.id,
            text: text.to_string(),
        };

        if text.eq_ignore_ascii_case("null") || text == "---" {
            return Ok(FieldValue::Null);
        }

        match &self.kind {
            FieldKind::Byte => text
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| unparseable()),
            FieldKind::Int16 { divisor } if *divisor <= 1 => text
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| unparseable()),
            FieldKind::Int16 { .. } => text
                .parse::<f64>()
                .map(FieldValue::Decimal)
                .map_err(|_| unparseable()),
            FieldKind::Choice { options } => {
                if let Ok(c) = text.parse::<u8>() {
                    return Ok(FieldValue::Choice(c));
                }
                options
                    .iter()
                    .find(|(_, label)| label.eq_ignore_ascii_case(text))
                    .map(|(c, _)| FieldValue::Choice(*c))
                    .ok_or_else(unparseable)
            }
        }
    }

    /// Render a value with the field's labels
    pub fn display_value(&self, value: &FieldValue) -> String {
        match (&self.kind, value) {
            (FieldKind::Choice { options }, FieldValue::Choice(c)) => match options.get(c) {
                Some(label) => format!("{c} ({label})"),
                None => c.to_string(),
            },
            _ => value.to_string(),
        }
    }
}

/// Lookup table of known fields
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: BTreeMap<u32, Field>,
}

impl FieldTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field
    pub fn insert(&mut self, field: Field) {
        self.fields.insert(field.id, field);
    }

    /// Builder-style insert
    pub fn with(mut self, field: Field) -> Self {
        self.insert(field);
        self
    }

    /// Look up a field
    pub fn get(&self, id: u32) -> Option<&Field> {
        self.fields.get(&id)
    }

    /// Look up a field, failing with a validation error if unknown
    pub fn field(&self, id: u32) -> Result<&Field, ValidateError> {
        self.get(id).ok_or(ValidateError::UnknownField(id))
    }

    /// Iterate fields in id order
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setpoint() -> Field {
        Field::new(710, "Comfort setpoint", FieldKind::Int16 { divisor: 10 }).range(12.0, 35.0)
    }

    fn mode() -> Field {
        let options = [(0, "Protection"), (1, "Automatic"), (3, "Comfort")]
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        Field::new(700, "Operating mode", FieldKind::Choice { options })
    }

    #[test]
    fn test_int16_scaling() {
        let field = setpoint();
        let payload = field.encode(&FieldValue::Decimal(21.5)).unwrap();
        assert_eq!(payload, vec![0x00, 0x00, 0xD7]);
        assert_eq!(field.decode(&payload), Ok(FieldValue::Decimal(21.5)));
    }

    #[test]
    fn test_negative_values() {
        let field = Field::new(8700, "Outside", FieldKind::Int16 { divisor: 10 });
        let payload = field.encode(&FieldValue::Decimal(-3.2)).unwrap();
        assert_eq!(field.decode(&payload), Ok(FieldValue::Decimal(-3.2)));
    }

    #[test]
    fn test_null_payload() {
        let field = setpoint().nullable();
        let payload = field.encode(&FieldValue::Null).unwrap();
        assert_eq!(payload, vec![0x01, 0x00, 0x00]);
        assert_eq!(field.decode(&payload), Ok(FieldValue::Null));
    }

    #[test]
    fn test_validation_rules() {
        assert_eq!(setpoint().validate(&FieldValue::Decimal(20.0)), Ok(()));
        assert!(matches!(
            setpoint().validate(&FieldValue::Decimal(40.0)),
            Err(ValidateError::OutOfRange { field: 710, .. })
        ));
        assert_eq!(
            setpoint().readonly().validate(&FieldValue::Decimal(20.0)),
            Err(ValidateError::ReadOnly(710))
        );
        assert_eq!(
            setpoint().validate(&FieldValue::Null),
            Err(ValidateError::NullNotAllowed(710))
        );
        assert_eq!(
            mode().validate(&FieldValue::Choice(2)),
            Err(ValidateError::UnknownChoice {
                field: 700,
                choice: 2
            })
        );
        assert!(matches!(
            mode().validate(&FieldValue::Decimal(1.0)),
            Err(ValidateError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_unrepresentable_value() {
        let field = Field::new(1, "Byte", FieldKind::Byte);
        assert!(matches!(
            field.encode(&FieldValue::Integer(300)),
            Err(EncodeError::Unrepresentable { field: 1, .. })
        ));
        let wide = Field::new(2, "Wide", FieldKind::Int16 { divisor: 10 });
        assert!(wide.encode(&FieldValue::Decimal(5000.0)).is_err());
    }

    #[test]
    fn test_decode_length_and_flag_errors() {
        assert_eq!(
            setpoint().decode(&[0x00, 0x01]),
            Err(DecodeError::Length {
                field: 710,
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            setpoint().decode(&[0x07, 0x00, 0x01]),
            Err(DecodeError::UnknownFlag {
                field: 710,
                flag: 0x07
            })
        );
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(mode().parse_value("comfort"), Ok(FieldValue::Choice(3)));
        assert_eq!(mode().parse_value("1"), Ok(FieldValue::Choice(1)));
        assert_eq!(setpoint().parse_value("21.5"), Ok(FieldValue::Decimal(21.5)));
        assert_eq!(setpoint().parse_value("null"), Ok(FieldValue::Null));
        assert!(setpoint().parse_value("warm").is_err());
        assert_eq!(mode().display_value(&FieldValue::Choice(3)), "3 (Comfort)");
    }

    #[test]
    fn test_table_lookup() {
        let table = FieldTable::new().with(setpoint()).with(mode());
        assert_eq!(table.len(), 2);
        assert_eq!(table.field(710).map(|f| f.id), Ok(710));
        assert_eq!(table.field(9999), Err(ValidateError::UnknownField(9999)));
        let ids: Vec<u32> = table.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![700, 710]);
    }
}
