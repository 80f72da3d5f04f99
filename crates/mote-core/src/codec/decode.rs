use tracing::trace;

use super::value::{DecodedMessage, Value};
use super::{
    DecodeError, DEVICE_ID_KEY, GENERATION_TIME_KEY, HEADER_ATIME_KEY, HEADER_ORIGIN_KEY,
    TIMESTAMP_KEY,
};
use crate::frame::{Frame, FrameError};
use crate::schema::{ElementKind, FieldSchema, FieldType, FrameSchema, Role, HIGH_SUFFIX, LOW_SUFFIX};
use crate::DeviceId;

/// Decodes `frame` against `schema`.
///
/// The record starts with `timestamp`, `generation_time` and `device_id`,
/// followed by the fields in declaration order (arrays expanded to
/// `name[i]`), followed by any merged `_low`/`_high` values not already
/// present.  A field that lies past the end of the frame is left out and
/// decoding continues with the next one.
///
/// - `generation_time` is `receipt_timestamp - device_time * 1000` when the
///   frame carries a device clock, else `receipt_timestamp`.
/// - `device_id` is the originating device from the frame when present, else
///   `fallback_device_id`.
/// - NaN floats become [`Value::Null`].
///
/// # Errors
///
/// - [`DecodeError::NotDecodable`] for encode-only schemas.
/// - [`DecodeError::SizeMismatch`] when a strict-size schema sees a frame of
///   the wrong length.
///
/// # Examples
///
/// ```rust
/// use mote_core::{decode, FieldSchema, FieldType, Frame, FrameSchema, Value, WireFormat};
///
/// let schema = FrameSchema::new(
///     0x10,
///     "Reading",
///     vec![
///         FieldSchema::new("field0", 0, 16, FieldType::Unsigned),
///         FieldSchema::new("field1", 16, 16, FieldType::Unsigned),
///     ],
///     4,
///     WireFormat::Current,
/// )
/// .unwrap();
///
/// let record = decode(&schema, &Frame::from_bytes(vec![0x00, 0x01, 0x00, 0x64]), 1000, Some(7)).unwrap();
/// assert_eq!(record.get("generation_time"), Some(&Value::Int(1000)));
/// assert_eq!(record.get("device_id"), Some(&Value::Int(7)));
/// assert_eq!(record.get("field1"), Some(&Value::UInt(100)));
/// ```
pub fn decode(
    schema: &FrameSchema,
    frame: &Frame,
    receipt_timestamp: i64,
    fallback_device_id: Option<DeviceId>,
) -> Result<DecodedMessage, DecodeError> {
    if !schema.construction().can_decode() {
        return Err(DecodeError::NotDecodable(schema.name().to_string()));
    }
    if schema.strict_size() && frame.data_length() != schema.default_size() {
        return Err(DecodeError::SizeMismatch {
            schema: schema.name().to_string(),
            expected: schema.default_size(),
            actual: frame.data_length(),
        });
    }

    let mut record = DecodedMessage::new();
    record.insert(TIMESTAMP_KEY, Value::Int(receipt_timestamp));
    record.insert(GENERATION_TIME_KEY, Value::Null);
    record.insert(DEVICE_ID_KEY, Value::Null);

    for field in schema.fields() {
        match field.kind {
            ElementKind::Scalar => {
                if let Some(value) = read_or_skip(schema, field, frame, field.bit_offset, &field.name) {
                    record.insert(field.name.clone(), value);
                }
            }
            ElementKind::Array(len) => {
                for i in 0..len {
                    let name = format!("{}[{}]", field.name, i);
                    let offset = field.bit_offset + i * field.bit_width;
                    if let Some(value) = read_or_skip(schema, field, frame, offset, &name) {
                        record.insert(name, value);
                    }
                }
            }
        }
    }

    merge_split_fields(schema, &mut record);

    let device_time = header_value(schema, &record, Role::HeaderTimestamp, HEADER_ATIME_KEY);
    let generation_time = match device_time {
        Some(seconds) => receipt_timestamp.saturating_sub(seconds.saturating_mul(1000)),
        None => receipt_timestamp,
    };
    record.insert(GENERATION_TIME_KEY, Value::Int(generation_time));

    let device_id = header_value(schema, &record, Role::HeaderOrigin, HEADER_ORIGIN_KEY)
        .or(fallback_device_id.map(i64::from))
        .map_or(Value::Null, Value::Int);
    record.insert(DEVICE_ID_KEY, device_id);

    record.null_nans();
    Ok(record)
}

fn read_or_skip(
    schema: &FrameSchema,
    field: &FieldSchema,
    frame: &Frame,
    bit_offset: usize,
    name: &str,
) -> Option<Value> {
    match read_value(field, frame, bit_offset) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!("{}: omitting '{}': {}", schema.name(), name, e);
            None
        }
    }
}

fn read_value(field: &FieldSchema, frame: &Frame, bit_offset: usize) -> Result<Value, FrameError> {
    let width = field.bit_width;
    Ok(match field.field_type {
        FieldType::Unsigned => Value::UInt(frame.read(bit_offset, width)?),
        FieldType::Signed => Value::Int(frame.read_signed(bit_offset, width)?),
        FieldType::Float if width == 32 => Value::Float(f32::from_bits(frame.read(bit_offset, 32)? as u32)),
        FieldType::Float => Value::Double(f64::from_bits(frame.read(bit_offset, 64)?)),
        FieldType::Bytes => {
            let mut bytes = Vec::with_capacity(width / 8);
            for i in 0..width / 8 {
                bytes.push(frame.read(bit_offset + i * 8, 8)? as u8);
            }
            Value::Bytes(bytes)
        }
    })
}

/// Stores `low + (high << 16)` under the base name of every split pair that
/// has at least one part present; a missing part counts as 0.
fn merge_split_fields(schema: &FrameSchema, record: &mut DecodedMessage) {
    for base in schema.merged_names() {
        let low = record.get(&format!("{base}{LOW_SUFFIX}")).and_then(Value::as_i64);
        let high = record.get(&format!("{base}{HIGH_SUFFIX}")).and_then(Value::as_i64);
        if low.is_none() && high.is_none() {
            continue;
        }
        let merged = low.unwrap_or(0).wrapping_add(high.unwrap_or(0).wrapping_shl(16));
        record.insert(base, Value::Int(merged));
    }
}

/// Integer value of the field carrying `role`, or of `fallback_key` when no
/// field has that role.
fn header_value(schema: &FrameSchema, record: &DecodedMessage, role: Role, fallback_key: &str) -> Option<i64> {
    let key = schema.field_with_role(role).map_or(fallback_key, |f| f.name.as_str());
    record.get(key).and_then(Value::as_i64)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
