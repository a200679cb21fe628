//! Demonstration field table
//!
//! A handful of common heating-circuit fields, enough to drive the simulator
//! and the gateway end to end. Real installations supply their own table.

use std::collections::BTreeMap;

use crate::field::{Field, FieldKind, FieldTable};

fn options(entries: &[(u8, &str)]) -> BTreeMap<u8, String> {
    entries.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

/// Build the demonstration table
pub fn demo_table() -> FieldTable {
    FieldTable::new()
        .with(Field::new(
            700,
            "Operating mode HC1",
            FieldKind::Choice {
                options: options(&[
                    (0, "Protection"),
                    (1, "Automatic"),
                    (2, "Reduced"),
                    (3, "Comfort"),
                ]),
            },
        ))
        .with(
            Field::new(710, "Comfort setpoint HC1", FieldKind::Int16 { divisor: 10 })
                .range(12.0, 35.0),
        )
        .with(
            Field::new(712, "Reduced setpoint HC1", FieldKind::Int16 { divisor: 10 })
                .range(10.0, 30.0),
        )
        .with(Field::new(
            1600,
            "DHW operating mode",
            FieldKind::Choice {
                options: options(&[(0, "Off"), (1, "On"), (2, "Eco")]),
            },
        ))
        .with(Field::new(6225, "Device family", FieldKind::Byte).readonly())
        .with(
            Field::new(8700, "Outside temperature", FieldKind::Int16 { divisor: 10 })
                .readonly()
                .nullable(),
        )
        .with(
            Field::new(8740, "Room temperature 1", FieldKind::Int16 { divisor: 10 })
                .readonly()
                .nullable(),
        )
        .with(
            Field::new(8830, "DHW temperature", FieldKind::Int16 { divisor: 10 }).readonly(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;

    #[test]
    fn test_demo_table_contents() {
        let table = demo_table();
        assert_eq!(table.len(), 8);
        assert!(table.get(8700).is_some_and(|f| f.readonly && f.nullable));
        assert!(table
            .get(710)
            .is_some_and(|f| f.validate(&FieldValue::Decimal(21.0)).is_ok()));
    }
}
