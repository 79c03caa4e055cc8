//! Record decoding and encoding.
//!
//! A record is one JSON object per line. Only the category and timestamp
//! fields are interpreted; everything else rides along untouched.

use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// What gets written to a partition file for each record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// The original line, byte for byte.
    #[default]
    Full,
    /// Only the category and timestamp fields.
    Compact,
}

impl std::str::FromStr for Projection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Projection::Full),
            "compact" => Ok(Projection::Compact),
            other => Err(format!("unknown projection '{}' (expected full or compact)", other)),
        }
    }
}

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Category label, empty when the field is missing or not a string.
    pub category: String,
    /// Timestamp, when present as a number or a numeric string.
    pub timestamp: Option<f64>,
    /// The original line without its terminator.
    raw: String,
}

impl Record {
    /// The original JSON text of this record.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Field names the decoder looks at.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub category_field: String,
    pub timestamp_field: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            category_field: "subreddit".to_string(),
            timestamp_field: "created_utc".to_string(),
        }
    }
}

impl RecordSchema {
    pub fn new(category_field: impl Into<String>, timestamp_field: impl Into<String>) -> Self {
        Self {
            category_field: category_field.into(),
            timestamp_field: timestamp_field.into(),
        }
    }

    /// Decode one line into a record.
    ///
    /// Fails only when the line is not a JSON object. A missing or
    /// non-string category decodes to an empty category.
    pub fn decode(&self, line: &[u8]) -> Result<Record, DecodeError> {
        let value: Value = serde_json::from_slice(line)?;
        let object = match value {
            Value::Object(map) => map,
            other => return Err(DecodeError::NotAnObject(json_kind(&other))),
        };

        let category = object
            .get(&self.category_field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = object.get(&self.timestamp_field).and_then(parse_timestamp);

        // from_slice succeeded, so the bytes are valid UTF-8.
        let raw = String::from_utf8_lossy(line).trim().to_string();

        Ok(Record {
            category,
            timestamp,
            raw,
        })
    }

    /// Write one record followed by a newline.
    pub fn encode<W: Write>(
        &self,
        record: &Record,
        projection: Projection,
        out: &mut W,
    ) -> std::io::Result<()> {
        match projection {
            Projection::Full => out.write_all(record.raw.as_bytes())?,
            Projection::Compact => {
                let mut map = Map::new();
                map.insert(
                    self.category_field.clone(),
                    Value::String(record.category.clone()),
                );
                let ts = record
                    .timestamp
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                map.insert(self.timestamp_field.clone(), ts);
                serde_json::to_writer(&mut *out, &Value::Object(map))?;
            }
        }
        out.write_all(b"\n")
    }
}

/// Dumps carry timestamps both as numbers and as numeric strings.
fn parse_timestamp(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
