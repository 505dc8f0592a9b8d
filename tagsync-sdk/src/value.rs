use crate::types::TagDataType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

/// A typed tag value as stored in the local tag tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Boolean(bool),
    Integer(i32),
    Dword(i64),
    Float(f64),
    String(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot represent {found} as {expected}")]
pub struct TagValueCastError {
    pub expected: TagDataType,
    pub found: String,
}

impl TagValue {
    pub fn data_type(&self) -> TagDataType {
        match self {
            TagValue::Boolean(_) => TagDataType::Boolean,
            TagValue::Integer(_) => TagDataType::Integer,
            TagValue::Dword(_) => TagDataType::Dword,
            TagValue::Float(_) => TagDataType::Float,
            TagValue::String(_) => TagDataType::String,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Boolean(v) => write!(f, "{v}"),
            TagValue::Integer(v) => write!(f, "{v}"),
            TagValue::Dword(v) => write!(f, "{v}"),
            TagValue::Float(v) => write!(f, "{v}"),
            TagValue::String(v) => f.write_str(v),
        }
    }
}

fn cast_err(expected: TagDataType, raw: &JsonValue) -> TagValueCastError {
    TagValueCastError {
        expected,
        found: raw.to_string(),
    }
}

/// Coerces a raw JSON value from a relay payload into the declared tag type.
///
/// Numeric payloads arrive as JSON numbers or as numeric strings; booleans
/// additionally accept 0/1. Values that cannot be represented in the target
/// type fail rather than truncate.
pub fn coerce_value(raw: &JsonValue, data_type: TagDataType) -> Result<TagValue, TagValueCastError> {
    match data_type {
        TagDataType::Boolean => match raw {
            JsonValue::Bool(b) => Ok(TagValue::Boolean(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(0) => Ok(TagValue::Boolean(false)),
                Some(1) => Ok(TagValue::Boolean(true)),
                _ => match n.as_f64() {
                    Some(f) if f == 0.0 => Ok(TagValue::Boolean(false)),
                    Some(f) if f == 1.0 => Ok(TagValue::Boolean(true)),
                    _ => Err(cast_err(data_type, raw)),
                },
            },
            JsonValue::String(s) => match s.trim() {
                "true" | "1" => Ok(TagValue::Boolean(true)),
                "false" | "0" => Ok(TagValue::Boolean(false)),
                _ => Err(cast_err(data_type, raw)),
            },
            _ => Err(cast_err(data_type, raw)),
        },
        TagDataType::Integer => {
            let n = json_to_f64(raw).ok_or_else(|| cast_err(data_type, raw))?;
            if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 {
                Ok(TagValue::Integer(n as i32))
            } else {
                Err(cast_err(data_type, raw))
            }
        }
        TagDataType::Dword => {
            let n = json_to_f64(raw).ok_or_else(|| cast_err(data_type, raw))?;
            if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
                Ok(TagValue::Dword(n as i64))
            } else {
                Err(cast_err(data_type, raw))
            }
        }
        TagDataType::Float => json_to_f64(raw)
            .map(TagValue::Float)
            .ok_or_else(|| cast_err(data_type, raw)),
        TagDataType::String => match raw {
            JsonValue::String(s) => Ok(TagValue::String(s.clone())),
            JsonValue::Bool(b) => Ok(TagValue::String(b.to_string())),
            JsonValue::Number(n) => Ok(TagValue::String(n.to_string())),
            // gateways report an empty string tag as null
            JsonValue::Null => Ok(TagValue::String(String::new())),
            _ => Err(cast_err(data_type, raw)),
        },
    }
}

fn json_to_f64(raw: &JsonValue) -> Option<f64> {
    match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
