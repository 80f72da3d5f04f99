//! Decoded field values and the ordered record they form.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Value of one decoded field.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    /// Absent reading (NaN from the hardware, unset derived key).
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value; `None` for non-integers and for unsigned
    /// values that do not fit an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(v) => Some(v),
            Value::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            Value::Int(v) => Some(v as f64),
            Value::UInt(v) => Some(v as f64),
            _ => None,
        }
    }

    fn is_nan(&self) -> bool {
        match *self {
            Value::Float(v) => v.is_nan(),
            Value::Double(v) => v.is_nan(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bytes(b) => write!(f, "{b:02X?}"),
            Value::Null => f.write_str("null"),
        }
    }
}

/// Ordered field-name → value record produced by decode.
///
/// Insertion order is preserved; the first three keys are always
/// `timestamp`, `generation_time` and `device_id`.  Serializes as a map in
/// that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMessage {
    entries: Vec<(String, Value)>,
}

impl DecodedMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Replaces the value under `name` in place, or appends a new entry.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every NaN float or double with [`Value::Null`].
    pub(crate) fn null_nans(&mut self) {
        for (_, value) in &mut self.entries {
            if value.is_nan() {
                *value = Value::Null;
            }
        }
    }
}

impl Serialize for DecodedMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut msg = DecodedMessage::new();
        msg.insert("a", Value::Int(1));
        msg.insert("b", Value::Int(2));
        msg.insert("a", Value::Int(3));

        let keys: Vec<&str> = msg.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(msg.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_null_nans_keeps_zero() {
        let mut msg = DecodedMessage::new();
        msg.insert("nan", Value::Float(f32::NAN));
        msg.insert("zero", Value::Double(0.0));

        msg.null_nans();

        assert_eq!(msg.get("nan"), Some(&Value::Null));
        assert_eq!(msg.get("zero"), Some(&Value::Double(0.0)));
    }

    #[test]
    fn test_serializes_as_ordered_json_object() {
        let mut msg = DecodedMessage::new();
        msg.insert("timestamp", Value::Int(1000));
        msg.insert("device_id", Value::Null);
        msg.insert("raw", Value::Bytes(vec![1, 2]));
        msg.insert("temp", Value::Float(21.5));

        let json = serde_json::to_string(&msg).unwrap();

        assert_eq!(json, r#"{"timestamp":1000,"device_id":null,"raw":[1,2],"temp":21.5}"#);
    }

    #[test]
    fn test_integer_views() {
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
        assert_eq!(Value::Null.as_f64(), None);
    }
}
