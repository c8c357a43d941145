//! Attribute type identifiers for relation columns.

use serde::{Deserialize, Serialize};

/// Identifier for the type of an indexed attribute.
///
/// The type tag is persisted in the index meta page and cross-checked
/// when an existing index file is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    /// 32-bit signed integer.
    Integer = 0,
    /// 64-bit IEEE float.
    Double = 1,
    /// Null-terminated character data.
    Text = 2,
}

impl AttrType {
    /// Returns the fixed byte size of a value of this type within a
    /// record, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            AttrType::Integer => Some(4),
            AttrType::Double => Some(8),
            AttrType::Text => None,
        }
    }

    /// Decodes a persisted type tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::Text),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::Text => "TEXT",
        };
        write!(f, "{}", name)
    }
}
