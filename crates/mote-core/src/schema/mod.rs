//! Frame schemas: the field layout of each message type.
//!
//! A [`FrameSchema`] lists the fields of one message type in declaration
//! order.  Each [`FieldSchema`] names a bit range of the payload, how to
//! interpret it, and which role it plays in record derivation (split
//! `_low`/`_high` words, device timestamp, originating device).
//!
//! Schemas are plain data.  They are loaded from a TOML description at
//! startup (see [`description`]) and frozen in a [`SchemaRegistry`].

pub mod description;
pub mod registry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::WireFormat;

pub use registry::SchemaRegistry;

/// Active-message type identifier carried in every packet header.
pub type MessageType = u8;

/// Suffix marking the low 16-bit word of a split field.
pub const LOW_SUFFIX: &str = "_low";
/// Suffix marking the high word of a split field.
pub const HIGH_SUFFIX: &str = "_high";

/// Keys seeded into every decoded record; fields may not reuse them.
pub const RESERVED_NAMES: [&str; 3] = ["timestamp", "generation_time", "device_id"];

/// Errors raised while building, loading, or looking up schemas.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No schema is registered for the message type.
    #[error("no schema registered for message type 0x{0:02X}")]
    UnknownType(MessageType),

    /// A schema for this message type has already been registered.
    #[error("schema for message type 0x{0:02X} registered twice")]
    Duplicate(MessageType),

    /// The schema's own type differs from the type it was registered under.
    #[error("schema '{name}' declares type 0x{declared:02X} but was registered as 0x{registered:02X}")]
    TypeMismatch {
        name: String,
        declared: MessageType,
        registered: MessageType,
    },

    /// Two fields of the same schema cover overlapping bits.
    #[error("schema '{schema}': fields '{first}' and '{second}' overlap")]
    Overlap {
        schema: String,
        first: String,
        second: String,
    },

    /// A field definition breaks one of the layout rules.
    #[error("schema '{schema}': field '{field}': {reason}")]
    InvalidField {
        schema: String,
        field: String,
        reason: String,
    },

    /// The description file could not be read.
    #[error("I/O error reading schema description {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The description is not valid TOML or does not match the layout.
    #[error("failed to parse schema description: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How the bits of a field are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    /// Unsigned integer of any width up to 64 bits.
    Unsigned,
    /// Two's-complement integer of any width up to 64 bits.
    Signed,
    /// IEEE-754 float; 32 bits wide (`float`) or 64 bits wide (`double`).
    Float,
    /// Raw byte sequence; byte aligned.
    Bytes,
}

/// Scalar or fixed-length array of elements of the field's width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementKind {
    #[default]
    Scalar,
    /// `n` consecutive elements, each `bit_width` bits wide.
    Array(usize),
}

/// Role of a field in record derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    Normal,
    /// Low 16-bit word of a split field named `<base>_low`.
    LowPart,
    /// High word of a split field named `<base>_high`.
    HighPart,
    /// Device time in seconds, used to derive `generation_time`.
    HeaderTimestamp,
    /// Id of the device that originated the message.
    HeaderOrigin,
}

/// Which directions a schema supports.
///
/// Some message classes can only be parsed from received bytes, others only
/// built empty and filled by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Construction {
    Decode,
    Encode,
    #[default]
    Both,
}

impl Construction {
    pub fn can_decode(self) -> bool {
        matches!(self, Construction::Decode | Construction::Both)
    }

    pub fn can_encode(self) -> bool {
        matches!(self, Construction::Encode | Construction::Both)
    }
}

/// Layout of a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub bit_offset: usize,
    pub bit_width: usize,
    pub field_type: FieldType,
    pub kind: ElementKind,
    pub role: Role,
    /// Whether operators may set this field when encoding a command.
    pub settable: bool,
}

impl FieldSchema {
    /// Creates a settable scalar field with the `normal` role.
    ///
    /// The name is lower-cased so decoded records always use lower-case keys.
    pub fn new(name: &str, bit_offset: usize, bit_width: usize, field_type: FieldType) -> Self {
        Self {
            name: name.to_lowercase(),
            bit_offset,
            bit_width,
            field_type,
            kind: ElementKind::Scalar,
            role: Role::Normal,
            settable: true,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn array(mut self, len: usize) -> Self {
        self.kind = ElementKind::Array(len);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.settable = false;
        self
    }

    /// Total number of bits covered by the field (all elements for arrays).
    pub fn span_bits(&self) -> usize {
        match self.kind {
            ElementKind::Scalar => self.bit_width,
            ElementKind::Array(len) => self.bit_width * len,
        }
    }

    /// First bit after the field.
    pub fn end_bit(&self) -> usize {
        self.bit_offset + self.span_bits()
    }

    /// For `_low`/`_high` parts, the name of the merged value.
    pub fn merged_name(&self) -> Option<&str> {
        match self.role {
            Role::LowPart => self.name.strip_suffix(LOW_SUFFIX),
            Role::HighPart => self.name.strip_suffix(HIGH_SUFFIX),
            _ => None,
        }
    }

    fn validate(&self, schema: &str) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidField {
            schema: schema.to_string(),
            field: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("field name must not be empty".to_string()));
        }
        if RESERVED_NAMES.contains(&self.name.as_str()) {
            return Err(invalid("name is reserved for derived record keys".to_string()));
        }
        if self.bit_width == 0 || self.bit_width > 64 {
            return Err(invalid(format!("bit width {} outside 1..=64", self.bit_width)));
        }
        if let ElementKind::Array(0) = self.kind {
            return Err(invalid("array length must be at least 1".to_string()));
        }
        match self.field_type {
            FieldType::Float if self.bit_width != 32 && self.bit_width != 64 => {
                return Err(invalid(format!(
                    "float fields are 32 or 64 bits wide, got {}",
                    self.bit_width
                )));
            }
            FieldType::Bytes if self.bit_offset % 8 != 0 || self.bit_width % 8 != 0 => {
                return Err(invalid("bytes fields must be byte aligned".to_string()));
            }
            _ => {}
        }
        match self.role {
            Role::LowPart if self.merged_name().map_or(true, str::is_empty) => {
                return Err(invalid(format!("low-part fields must be named <base>{LOW_SUFFIX}")));
            }
            Role::HighPart if self.merged_name().map_or(true, str::is_empty) => {
                return Err(invalid(format!("high-part fields must be named <base>{HIGH_SUFFIX}")));
            }
            Role::LowPart | Role::HighPart | Role::HeaderTimestamp | Role::HeaderOrigin
                if !matches!(self.field_type, FieldType::Unsigned | FieldType::Signed)
                    || self.kind != ElementKind::Scalar =>
            {
                return Err(invalid("derivation roles require a scalar integer field".to_string()));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Ordered field layout of one message type.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSchema {
    message_type: MessageType,
    name: String,
    fields: Vec<FieldSchema>,
    default_size: usize,
    strict_size: bool,
    construction: Construction,
    wire_format: WireFormat,
}

impl FrameSchema {
    /// Builds and validates a schema.
    ///
    /// `default_size` is the payload size in bytes used when encoding.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidField`] for malformed fields and
    /// [`SchemaError::Overlap`] if two fields cover the same bits.
    pub fn new(
        message_type: MessageType,
        name: &str,
        fields: Vec<FieldSchema>,
        default_size: usize,
        wire_format: WireFormat,
    ) -> Result<Self, SchemaError> {
        for field in &fields {
            field.validate(name)?;
        }

        // Sort by start bit so overlap detection only compares neighbours.
        let mut ranges: Vec<&FieldSchema> = fields.iter().collect();
        ranges.sort_by_key(|f| f.bit_offset);
        for pair in ranges.windows(2) {
            if pair[0].end_bit() > pair[1].bit_offset {
                return Err(SchemaError::Overlap {
                    schema: name.to_string(),
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        if let Some(field) = fields.iter().find(|f| f.settable && f.end_bit() > default_size * 8) {
            return Err(SchemaError::InvalidField {
                schema: name.to_string(),
                field: field.name.clone(),
                reason: format!("settable field ends past the {default_size}-byte payload"),
            });
        }

        Ok(Self {
            message_type,
            name: name.to_string(),
            fields,
            default_size,
            strict_size: false,
            construction: Construction::Both,
            wire_format,
        })
    }

    /// Requires decoded frames to be exactly `default_size` bytes long.
    pub fn with_strict_size(mut self, strict: bool) -> Self {
        self.strict_size = strict;
        self
    }

    pub fn with_construction(mut self, construction: Construction) -> Self {
        self.construction = construction;
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn default_size(&self) -> usize {
        self.default_size
    }

    pub fn strict_size(&self) -> bool {
        self.strict_size
    }

    pub fn construction(&self) -> Construction {
        self.construction
    }

    pub fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    /// The first field carrying `role`, if any.
    pub fn field_with_role(&self, role: Role) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.role == role)
    }

    /// Base names of split fields in order of first appearance.
    pub fn merged_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for base in self.fields.iter().filter_map(FieldSchema::merged_name) {
            if !names.contains(&base) {
                names.push(base);
            }
        }
        names
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
