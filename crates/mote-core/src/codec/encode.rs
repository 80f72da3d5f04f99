use tracing::trace;

use super::params::NamedParameters;
use super::EncodeError;
use crate::frame::Frame;
use crate::schema::{ElementKind, FieldSchema, FieldType, FrameSchema};
use crate::wire::{self, WireFormat, MAX_PAYLOAD_LEN};

/// Encodes `params` into a payload frame of the schema's default size.
///
/// Every settable field needs a parameter whose name matches the field name
/// case-insensitively.  Integers are range checked against the field's
/// width and signedness; array values are comma separated; `bytes` fields
/// take the UTF-8 bytes of the value, zero padded.  Parameters that match no
/// field are ignored.
///
/// # Errors
///
/// - [`EncodeError::NotEncodable`] for decode-only schemas.
/// - [`EncodeError::MissingField`] if a settable field has no parameter.
/// - [`EncodeError::UnparsableValue`] if a value does not parse or does not
///   fit the field.
pub fn encode(schema: &FrameSchema, params: &NamedParameters) -> Result<Frame, EncodeError> {
    if !schema.construction().can_encode() {
        return Err(EncodeError::NotEncodable(schema.name().to_string()));
    }

    let mut frame = Frame::new(schema.default_size());
    for field in schema.fields().iter().filter(|f| f.settable) {
        let raw = params.get(&field.name).ok_or_else(|| EncodeError::MissingField {
            schema: schema.name().to_string(),
            field: field.name.clone(),
        })?;

        match field.kind {
            ElementKind::Scalar => write_element(&mut frame, field, field.bit_offset, raw.trim())?,
            ElementKind::Array(len) => {
                let items: Vec<&str> = raw.split(',').map(str::trim).collect();
                if items.len() != len {
                    return Err(unparsable(field, raw, format!("expected {len} comma-separated values")));
                }
                for (i, item) in items.iter().enumerate() {
                    write_element(&mut frame, field, field.bit_offset + i * field.bit_width, item)?;
                }
            }
        }
    }
    trace!("{}: encoded {} bytes", schema.name(), frame.data_length());
    Ok(frame)
}

/// Encodes `params` and wraps the payload for `destination` in `variant`.
///
/// # Errors
///
/// - [`EncodeError::ProtocolMismatch`] if `variant` is not the schema's
///   wire format.
/// - [`EncodeError::PayloadTooLong`] if the payload exceeds 255 bytes.
/// - Any error of [`encode`].
pub fn encode_packet(
    schema: &FrameSchema,
    params: &NamedParameters,
    destination: u16,
    variant: WireFormat,
) -> Result<Vec<u8>, EncodeError> {
    if variant != schema.wire_format() {
        return Err(EncodeError::ProtocolMismatch {
            schema: schema.name().to_string(),
            expected: schema.wire_format(),
            requested: variant,
        });
    }
    let frame = encode(schema, params)?;
    let payload = frame.as_bytes();
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLong(payload.len()));
    }
    Ok(wire::wrap(variant, destination, schema.message_type(), payload)?)
}

fn write_element(frame: &mut Frame, field: &FieldSchema, bit_offset: usize, raw: &str) -> Result<(), EncodeError> {
    let width = field.bit_width;
    match field.field_type {
        FieldType::Unsigned => {
            let value = parse_u64(raw).map_err(|reason| unparsable(field, raw, reason))?;
            if width < 64 && value >> width != 0 {
                return Err(unparsable(field, raw, format!("does not fit in {width} unsigned bits")));
            }
            frame.write(bit_offset, width, value)?;
        }
        FieldType::Signed => {
            let value: i64 = raw.parse().map_err(|e| unparsable(field, raw, format!("{e}")))?;
            if width < 64 {
                let max = (1i64 << (width - 1)) - 1;
                let min = -(1i64 << (width - 1));
                if value < min || value > max {
                    return Err(unparsable(field, raw, format!("does not fit in {width} signed bits")));
                }
            }
            frame.write(bit_offset, width, value as u64)?;
        }
        FieldType::Float if width == 32 => {
            let value: f32 = raw.parse().map_err(|e| unparsable(field, raw, format!("{e}")))?;
            frame.write(bit_offset, 32, u64::from(value.to_bits()))?;
        }
        FieldType::Float => {
            let value: f64 = raw.parse().map_err(|e| unparsable(field, raw, format!("{e}")))?;
            frame.write(bit_offset, 64, value.to_bits())?;
        }
        FieldType::Bytes => {
            let bytes = raw.as_bytes();
            if bytes.len() > width / 8 {
                return Err(unparsable(field, raw, format!("longer than {} bytes", width / 8)));
            }
            for (i, byte) in bytes.iter().enumerate() {
                frame.write(bit_offset + i * 8, 8, u64::from(*byte))?;
            }
        }
    }
    Ok(())
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_u64(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

fn unparsable(field: &FieldSchema, raw: &str, reason: String) -> EncodeError {
    EncodeError::UnparsableValue {
        field: field.name.clone(),
        value: raw.to_string(),
        reason,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Value};
    use crate::schema::Construction;
    use crate::wire::BROADCAST_ADDR;

    fn command_schema() -> FrameSchema {
        FrameSchema::new(
            0x30,
            "SetInterval",
            vec![
                FieldSchema::new("interval", 0, 16, FieldType::Unsigned),
                FieldSchema::new("offset", 16, 8, FieldType::Signed),
                FieldSchema::new("gain", 24, 32, FieldType::Float),
            ],
            7,
            WireFormat::Legacy,
        )
        .unwrap()
    }

    fn params() -> NamedParameters {
        NamedParameters::new()
            .with("INTERVAL", "300")
            .with("offset", "-2")
            .with("Gain", "1.5")
    }

    #[test]
    fn test_encode_writes_fields_at_their_offsets() {
        let frame = encode(&command_schema(), &params()).unwrap();

        assert_eq!(frame.data_length(), 7);
        assert_eq!(frame.read(0, 16), Ok(300));
        assert_eq!(frame.read_signed(16, 8), Ok(-2));
        assert_eq!(frame.read(24, 32), Ok(u64::from(1.5f32.to_bits())));
    }

    #[test]
    fn test_encode_then_decode_reproduces_values() {
        // Arrange
        let schema = command_schema();

        // Act
        let frame = encode(&schema, &params()).unwrap();
        let record = decode(&schema, &frame, 0, None).unwrap();

        // Assert
        assert_eq!(record.get("interval"), Some(&Value::UInt(300)));
        assert_eq!(record.get("offset"), Some(&Value::Int(-2)));
        assert_eq!(record.get("gain"), Some(&Value::Float(1.5)));
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let params = NamedParameters::new().with("interval", "1").with("gain", "0");
        assert_eq!(
            encode(&command_schema(), &params),
            Err(EncodeError::MissingField {
                schema: "SetInterval".to_string(),
                field: "offset".to_string()
            })
        );
    }

    #[test]
    fn test_unparsable_and_out_of_range_values_are_rejected() {
        let bad_number = NamedParameters::new().with("interval", "x").with("offset", "0").with("gain", "0");
        let too_big = NamedParameters::new().with("interval", "65536").with("offset", "0").with("gain", "0");
        let too_small = NamedParameters::new().with("interval", "1").with("offset", "-129").with("gain", "0");

        assert!(matches!(
            encode(&command_schema(), &bad_number),
            Err(EncodeError::UnparsableValue { .. })
        ));
        assert!(matches!(
            encode(&command_schema(), &too_big),
            Err(EncodeError::UnparsableValue { .. })
        ));
        assert!(matches!(
            encode(&command_schema(), &too_small),
            Err(EncodeError::UnparsableValue { .. })
        ));
    }

    #[test]
    fn test_read_only_fields_need_no_parameter() {
        let schema = FrameSchema::new(
            0x31,
            "Status",
            vec![
                FieldSchema::new("mode", 0, 8, FieldType::Unsigned),
                FieldSchema::new("counter", 8, 8, FieldType::Unsigned).read_only(),
            ],
            2,
            WireFormat::Current,
        )
        .unwrap();

        let frame = encode(&schema, &NamedParameters::new().with("mode", "0x0A")).unwrap();

        assert_eq!(frame.as_bytes(), &[0x0A, 0x00]);
    }

    #[test]
    fn test_array_values_are_comma_separated() {
        let schema = FrameSchema::new(
            0x32,
            "Thresholds",
            vec![FieldSchema::new("level", 0, 8, FieldType::Unsigned).array(3)],
            3,
            WireFormat::Current,
        )
        .unwrap();

        let ok = encode(&schema, &NamedParameters::new().with("level", "1, 2,3")).unwrap();
        let short = encode(&schema, &NamedParameters::new().with("level", "1,2"));

        assert_eq!(ok.as_bytes(), &[1, 2, 3]);
        assert!(matches!(short, Err(EncodeError::UnparsableValue { .. })));
    }

    #[test]
    fn test_bytes_field_is_zero_padded() {
        let schema = FrameSchema::new(
            0x33,
            "Label",
            vec![FieldSchema::new("name", 0, 32, FieldType::Bytes)],
            4,
            WireFormat::Current,
        )
        .unwrap();

        let frame = encode(&schema, &NamedParameters::new().with("name", "ab")).unwrap();

        assert_eq!(frame.as_bytes(), b"ab\0\0");
    }

    #[test]
    fn test_decode_only_schema_is_not_encodable() {
        let schema = command_schema().with_construction(Construction::Decode);
        assert!(matches!(encode(&schema, &params()), Err(EncodeError::NotEncodable(_))));
    }

    #[test]
    fn test_encode_packet_wraps_in_schema_format() {
        let packet = encode_packet(&command_schema(), &params(), BROADCAST_ADDR, WireFormat::Legacy).unwrap();

        assert_eq!(&packet[..5], &[0xFF, 0xFF, 0xFF, 0x30, 0x07]);
        assert_eq!(packet.len(), 12);
    }

    #[test]
    fn test_encode_packet_rejects_wrong_variant() {
        let result = encode_packet(&command_schema(), &params(), BROADCAST_ADDR, WireFormat::Current);
        assert!(matches!(result, Err(EncodeError::ProtocolMismatch { .. })));
    }

    #[test]
    fn test_encode_packet_rejects_oversized_payload() {
        let schema = FrameSchema::new(
            0x34,
            "Bulk",
            vec![FieldSchema::new("blob", 0, 8, FieldType::Unsigned).read_only()],
            300,
            WireFormat::Current,
        )
        .unwrap();

        let result = encode_packet(&schema, &NamedParameters::new(), BROADCAST_ADDR, WireFormat::Current);

        assert_eq!(result, Err(EncodeError::PayloadTooLong(300)));
    }
}
