//! Integration tests for the mote-core codec.
//!
//! These tests load the schema description fixture through the public API and
//! exercise decode, encode, and the wire formats together.

use mote_core::wire::{self, BROADCAST_ADDR};
use mote_core::{
    decode, encode, encode_packet, DecodedMessage, EncodeError, FieldSchema, FieldType, Frame,
    FrameSchema, NamedParameters, SchemaRegistry, Value, WireFormat,
};

const SCHEMAS: &str = include_str!("fixtures/schemas.toml");

const DOZER_STATUS: u8 = 0x88;
const SET_INTERVAL: u8 = 0x21;
const ENVIRONMENT: u8 = 0x22;

fn registry() -> SchemaRegistry {
    SchemaRegistry::from_toml_str(SCHEMAS).expect("fixture must load")
}

/// Builds a Dozer status payload with the given header clock and uptime parts.
fn dozer_frame(originator: u64, atime: (u64, u64), uptime: (u64, u64)) -> Frame {
    let mut frame = Frame::new(35);
    let fields = [
        (0, 16, 17),           // header_seqnr
        (16, 16, originator),  // header_originatorid
        (32, 16, atime.0),     // header_atime_low
        (48, 8, atime.1),      // header_atime_high
        (56, 16, 3),           // payload_sampleno
        (72, 16, uptime.0),    // payload_uptime_low
        (88, 8, uptime.1),     // payload_uptime_high
        (96, 16, 2210),        // payload_temperature
        (208, 8, 0xC4),        // payload_rssi
    ];
    for (offset, width, value) in fields {
        frame.write(offset, width, value).unwrap();
    }
    frame
}

fn keys(record: &DecodedMessage) -> Vec<&str> {
    record.keys().collect()
}

#[test]
fn test_fixture_registers_all_messages() {
    let registry = registry();
    assert_eq!(registry.message_types(), vec![SET_INTERVAL, ENVIRONMENT, DOZER_STATUS]);
    assert_eq!(registry.lookup(DOZER_STATUS).unwrap().wire_format(), WireFormat::Legacy);
}

#[test]
fn test_decode_dozer_status_derives_header_fields() {
    // Arrange
    let schema = registry().lookup(DOZER_STATUS).unwrap();
    let frame = dozer_frame(412, (60, 0), (0xFFFF, 0x01));

    // Act
    let record = decode(&schema, &frame, 1_000_000, Some(1)).unwrap();

    // Assert
    assert_eq!(&keys(&record)[..4], &["timestamp", "generation_time", "device_id", "header_seqnr"]);
    assert_eq!(record.get("timestamp"), Some(&Value::Int(1_000_000)));
    assert_eq!(record.get("generation_time"), Some(&Value::Int(940_000)));
    assert_eq!(record.get("device_id"), Some(&Value::Int(412)));
    assert_eq!(record.get("header_atime"), Some(&Value::Int(60)));
    assert_eq!(record.get("payload_uptime"), Some(&Value::Int(0x1FFFF)));
    assert_eq!(record.get("payload_temperature"), Some(&Value::UInt(2210)));
    assert_eq!(record.get("payload_rssi"), Some(&Value::UInt(0xC4)));
}

#[test]
fn test_decode_truncated_dozer_status_keeps_leading_fields() {
    // Older firmware sends only the header
    let schema = registry().lookup(DOZER_STATUS).unwrap();
    let full = dozer_frame(5, (1, 0), (0, 0)).into_bytes();
    let frame = Frame::from_bytes(full[..7].to_vec());

    let record = decode(&schema, &frame, 10_000, Some(1)).unwrap();

    assert_eq!(record.get("header_seqnr"), Some(&Value::UInt(17)));
    assert_eq!(record.get("generation_time"), Some(&Value::Int(9_000)));
    assert!(!record.contains_key("payload_sampleno"));
    assert!(!record.contains_key("payload_uptime"));
}

#[test]
fn test_decode_two_field_scenario_uses_fallback_device() {
    let schema = FrameSchema::new(
        0x01,
        "Reading",
        vec![
            FieldSchema::new("field0", 0, 16, FieldType::Signed),
            FieldSchema::new("field1", 16, 16, FieldType::Signed),
        ],
        4,
        WireFormat::Current,
    )
    .unwrap();

    let record = decode(&schema, &Frame::from_bytes(vec![0x00, 0x01, 0x00, 0x64]), 1000, Some(77)).unwrap();

    let json = serde_json::to_string(&record).unwrap();
    assert_eq!(
        json,
        r#"{"timestamp":1000,"generation_time":1000,"device_id":77,"field0":1,"field1":100}"#
    );
}

#[test]
fn test_nan_readings_decode_to_null_every_time() {
    let schema = registry().lookup(ENVIRONMENT).unwrap();
    let mut frame = Frame::new(10);
    frame.write(0, 16, 9).unwrap();
    frame.write(16, 32, u64::from(f32::NAN.to_bits())).unwrap();
    frame.write(48, 32, u64::from(0.0f32.to_bits())).unwrap();

    let first = decode(&schema, &frame, 0, None).unwrap();
    let second = decode(&schema, &frame, 0, None).unwrap();

    assert_eq!(first.get("airtemp"), Some(&Value::Null));
    assert_eq!(first.get("soiltemp"), Some(&Value::Float(0.0)));
    assert_eq!(first, second);
    assert_eq!(first.get("device_id"), Some(&Value::Int(9)));
}

#[test]
fn test_encode_then_decode_round_trips_non_split_schema() {
    // Arrange
    let schema = registry().lookup(ENVIRONMENT).unwrap();
    let params = NamedParameters::new()
        .with("header_originatorid", "31")
        .with("AirTemp", "-4.25")
        .with("soiltemp", "12.5");

    // Act
    let frame = encode(&schema, &params).unwrap();
    let record = decode(&schema, &frame, 0, None).unwrap();

    // Assert
    assert_eq!(record.get("header_originatorid"), Some(&Value::UInt(31)));
    assert_eq!(record.get("airtemp"), Some(&Value::Float(-4.25)));
    assert_eq!(record.get("soiltemp"), Some(&Value::Float(12.5)));
}

#[test]
fn test_command_packet_survives_wire_unwrap() {
    let schema = registry().lookup(SET_INTERVAL).unwrap();
    let params = NamedParameters::new().with("interval", "600").with("target", "0xFFFF");

    let packet = encode_packet(&schema, &params, BROADCAST_ADDR, WireFormat::Current).unwrap();
    let message = wire::unwrap(WireFormat::Current, &packet).unwrap();

    assert_eq!(packet[0], wire::ACTIVE_MESSAGE_MARKER);
    assert_eq!(message.destination, BROADCAST_ADDR);
    assert_eq!(message.am_type, SET_INTERVAL);
    assert_eq!(message.payload, vec![0x02, 0x58, 0xFF, 0xFF]);
}

#[test]
fn test_command_for_wrong_wire_format_is_rejected() {
    let schema = registry().lookup(SET_INTERVAL).unwrap();
    let params = NamedParameters::new().with("interval", "1").with("target", "1");

    let result = encode_packet(&schema, &params, BROADCAST_ADDR, WireFormat::Legacy);

    assert!(matches!(result, Err(EncodeError::ProtocolMismatch { .. })));
}

#[test]
fn test_received_legacy_packet_decodes_through_payload_window() {
    // Arrange
    let schema = registry().lookup(DOZER_STATUS).unwrap();
    let payload = dozer_frame(8, (0, 0), (2, 0)).into_bytes();
    let packet = wire::wrap(WireFormat::Legacy, 0x0001, DOZER_STATUS, &payload).unwrap();

    // Act
    let (am_type, frame) = wire::payload_frame(WireFormat::Legacy, packet).unwrap();
    let record = decode(&schema, &frame, 500, None).unwrap();

    // Assert
    assert_eq!(am_type, DOZER_STATUS);
    assert_eq!(record.get("device_id"), Some(&Value::Int(8)));
    assert_eq!(record.get("payload_uptime"), Some(&Value::Int(2)));
}
