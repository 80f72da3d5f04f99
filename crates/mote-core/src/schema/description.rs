//! Declarative TOML description of message schemas.
//!
//! One `[[message]]` table per message class, with one `[[message.field]]`
//! table per field in declaration order:
//!
//! ```toml
//! [[message]]
//! name = "DozerBaseStatusMsg"
//! type = 0x88
//! size = 35
//! wire_format = "legacy"
//!
//! [[message.field]]
//! name = "header_seqnr"
//! offset = 0
//! width = 16
//!
//! [[message.field]]
//! name = "header_atime_low"   # role inferred from the suffix
//! offset = 32
//! width = 16
//! ```
//!
//! Omitted keys take the defaults below: `type = "unsigned"`, `role` inferred
//! from a `_low`/`_high` suffix (else `normal`), `settable = true`,
//! `construction = "both"`, `strict_size = false`.

use serde::{Deserialize, Serialize};

use super::{
    Construction, FieldSchema, FieldType, FrameSchema, MessageType, Role, SchemaError, HIGH_SUFFIX,
    LOW_SUFFIX,
};
use crate::wire::WireFormat;

/// Root of a schema description file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDescription {
    #[serde(default, rename = "message")]
    pub messages: Vec<MessageDescription>,
}

/// One message class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Payload size in bytes used when encoding.
    pub size: usize,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default)]
    pub strict_size: bool,
    #[serde(default)]
    pub construction: Construction,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldDescription>,
}

/// One field of a message class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    /// Bit offset from the start of the payload.
    pub offset: usize,
    /// Bit width of one element.
    pub width: usize,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    /// Number of elements for array fields.
    #[serde(default)]
    pub array: Option<usize>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default = "default_true")]
    pub settable: bool,
}

fn default_field_type() -> FieldType {
    FieldType::Unsigned
}

fn default_true() -> bool {
    true
}

impl FieldDescription {
    fn to_schema(&self) -> FieldSchema {
        let mut field = FieldSchema::new(&self.name, self.offset, self.width, self.field_type);
        field.role = self.role.unwrap_or_else(|| infer_role(&field.name));
        field.settable = self.settable;
        if let Some(len) = self.array {
            field = field.array(len);
        }
        field
    }
}

impl MessageDescription {
    /// Builds and validates the [`FrameSchema`] for this message class.
    ///
    /// # Errors
    ///
    /// Propagates layout violations from [`FrameSchema::new`].
    pub fn to_schema(&self) -> Result<FrameSchema, SchemaError> {
        let fields = self.fields.iter().map(FieldDescription::to_schema).collect();
        Ok(FrameSchema::new(self.message_type, &self.name, fields, self.size, self.wire_format)?
            .with_strict_size(self.strict_size)
            .with_construction(self.construction))
    }
}

impl SchemaDescription {
    /// Parses a TOML description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        Ok(toml::from_str(content)?)
    }
}

fn infer_role(name: &str) -> Role {
    if name.ends_with(LOW_SUFFIX) {
        Role::LowPart
    } else if name.ends_with(HIGH_SUFFIX) {
        Role::HighPart
    } else {
        Role::Normal
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
