//! Native SQL type text to portable type mapping
//!
//! The mapping is total: every input yields a [`PortableType`], and anything
//! unrecognized falls back to [`PortableType::String`]. Rules are checked in
//! order against the lowercased input and the first substring hit wins, so
//! `datetime` resolves before `date` and `tinyint` matches `int`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;

/// Portable column type used in catalog output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortableType {
    /// Date and time of day
    DateTime,
    /// Calendar date
    Date,
    /// Fractional number
    Number,
    /// Whole number
    Integer,
    /// Text
    String,
    /// True/false
    Boolean,
    /// Structured document (JSON)
    Object,
}

const RULES: &[(&str, PortableType)] = &[
    ("timestamp", PortableType::DateTime),
    ("datetime", PortableType::DateTime),
    ("date", PortableType::Date),
    ("int", PortableType::Integer),
    ("numeric", PortableType::Number),
    ("decimal", PortableType::Number),
    ("double", PortableType::Number),
    ("float", PortableType::Number),
    ("string", PortableType::String),
    ("text", PortableType::String),
    ("char", PortableType::String),
    ("bool", PortableType::Boolean),
    ("variant", PortableType::String),
];

/// Map native type text (e.g. `varchar(255)`, `BIGINT UNSIGNED`) to a portable type
pub fn map_type(native_type: &str) -> PortableType {
    let lowered = native_type.to_lowercase();
    RULES
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, ty)| *ty)
        .unwrap_or(PortableType::String)
}

/// Map a type-class name, giving JSON documents the object type
///
/// Only the exact names `JSON` and `JSONB` are recognized; everything else
/// goes through [`map_type`].
pub fn map_type_class(type_class_name: &str) -> PortableType {
    match type_class_name {
        "JSON" | "JSONB" => PortableType::Object,
        other => map_type(other),
    }
}

impl PortableType {
    /// JSON-Schema type keyword
    pub const fn json_type(self) -> &'static str {
        match self {
            Self::DateTime | Self::Date | Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    /// JSON-Schema `format`, for the temporal types
    pub const fn json_format(self) -> Option<&'static str> {
        match self {
            Self::DateTime => Some("date-time"),
            Self::Date => Some("date"),
            _ => None,
        }
    }

    /// Whether values of this type are temporal
    pub const fn is_temporal(self) -> bool {
        matches!(self, Self::DateTime | Self::Date)
    }

    /// Render the JSON-Schema fragment for a column of this type
    pub fn json_schema(self, nullable: bool) -> JsonValue {
        if self == Self::Object {
            return json!({ "type": "object" });
        }
        let ty = if nullable {
            json!([self.json_type(), "null"])
        } else {
            json!(self.json_type())
        };
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), ty);
        if let Some(format) = self.json_format() {
            schema.insert("format".into(), json!(format));
        }
        JsonValue::Object(schema)
    }
}

impl fmt::Display for PortableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DateTime => "DateTime",
            Self::Date => "Date",
            Self::Number => "Number",
            Self::Integer => "Integer",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Object => "Object",
        };
        f.write_str(name)
    }
}
