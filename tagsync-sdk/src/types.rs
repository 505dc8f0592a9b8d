use serde::{Deserialize, Serialize};
use std::fmt;

/// Data types a remote tag can carry.
///
/// The relay reports a tag's type either as a numeric code or as a lowercase
/// name depending on the endpoint; both forms decode to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagDataType {
    Boolean,
    Float,
    #[serde(alias = "uint")]
    Integer,
    Dword,
    String,
}

impl TagDataType {
    /// Decodes the numeric type code used by the bulk historical payload.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TagDataType::Boolean),
            1 => Some(TagDataType::Float),
            2 => Some(TagDataType::Integer),
            3 => Some(TagDataType::Dword),
            6 => Some(TagDataType::String),
            _ => None,
        }
    }

    /// Decodes the lowercase type name used by the live-data payload.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(TagDataType::Boolean),
            "float" => Some(TagDataType::Float),
            "int" | "uint" => Some(TagDataType::Integer),
            "dword" => Some(TagDataType::Dword),
            "string" => Some(TagDataType::String),
            _ => None,
        }
    }
}

impl fmt::Display for TagDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TagDataType::Boolean => "bool",
            TagDataType::Float => "float",
            TagDataType::Integer => "int",
            TagDataType::Dword => "dword",
            TagDataType::String => "string",
        };
        f.write_str(s)
    }
}
