//! Registry mapping message types to their frame schemas.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::description::SchemaDescription;
use super::{FrameSchema, MessageType, SchemaError};

/// Frozen set of frame schemas keyed by message type.
///
/// Built once at startup, then shared as `Arc<SchemaRegistry>`.  There is no
/// interior mutability, so concurrent lookups need no locking.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<MessageType, Arc<FrameSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `schema` under `message_type`.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::TypeMismatch`] if the schema declares another type.
    /// - [`SchemaError::Duplicate`] if the type is already registered.
    pub fn register(&mut self, message_type: MessageType, schema: FrameSchema) -> Result<(), SchemaError> {
        if schema.message_type() != message_type {
            return Err(SchemaError::TypeMismatch {
                name: schema.name().to_string(),
                declared: schema.message_type(),
                registered: message_type,
            });
        }
        if self.schemas.contains_key(&message_type) {
            return Err(SchemaError::Duplicate(message_type));
        }
        debug!(
            "registered schema '{}' for type 0x{:02X} ({} fields)",
            schema.name(),
            message_type,
            schema.fields().len()
        );
        self.schemas.insert(message_type, Arc::new(schema));
        Ok(())
    }

    /// Looks up the schema for `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownType`] if nothing is registered.
    pub fn lookup(&self, message_type: MessageType) -> Result<Arc<FrameSchema>, SchemaError> {
        self.schemas
            .get(&message_type)
            .cloned()
            .ok_or(SchemaError::UnknownType(message_type))
    }

    pub fn contains(&self, message_type: MessageType) -> bool {
        self.schemas.contains_key(&message_type)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered message types in ascending order.
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.schemas.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Builds a registry from a TOML schema description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for malformed TOML and any validation or
    /// registration error of the described schemas.
    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let description = SchemaDescription::from_toml_str(content)?;
        let mut registry = Self::new();
        for message in &description.messages {
            registry.register(message.message_type, message.to_schema()?)?;
        }
        Ok(registry)
    }

    /// Reads and builds a registry from a TOML description file.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] if the file cannot be read, otherwise the
    /// errors of [`SchemaRegistry::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, FieldType};
    use crate::wire::WireFormat;

    fn schema(message_type: MessageType) -> FrameSchema {
        FrameSchema::new(
            message_type,
            "Test",
            vec![FieldSchema::new("value", 0, 8, FieldType::Unsigned)],
            1,
            WireFormat::Current,
        )
        .unwrap()
    }

    #[test]
    fn test_register_then_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register(0x10, schema(0x10)).unwrap();

        let found = registry.lookup(0x10).unwrap();
        assert_eq!(found.name(), "Test");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_type_fails() {
        let registry = SchemaRegistry::new();
        assert!(matches!(registry.lookup(0x99), Err(SchemaError::UnknownType(0x99))));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = SchemaRegistry::new();
        registry.register(0x10, schema(0x10)).unwrap();
        assert!(matches!(
            registry.register(0x10, schema(0x10)),
            Err(SchemaError::Duplicate(0x10))
        ));
    }

    #[test]
    fn test_register_under_wrong_type_fails() {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.register(0x11, schema(0x10)),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_toml_str_rejects_duplicate_messages() {
        let content = r#"
            [[message]]
            name = "A"
            type = 7
            size = 1

            [[message]]
            name = "B"
            type = 7
            size = 1
        "#;
        assert!(matches!(
            SchemaRegistry::from_toml_str(content),
            Err(SchemaError::Duplicate(7))
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = SchemaRegistry::load("/nonexistent/mote-schemas.toml");
        assert!(matches!(result, Err(SchemaError::Io { .. })));
    }
}
