// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 Line Protocol encoding.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use std::fmt;
use thiserror::Error;

/// Point encoding errors.
#[derive(Debug, Error)]
pub enum PointError {
    #[error("point for '{0}' has no fields")]
    NoFields(String),
}

/// A value stored in a time-series field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit unsigned integer (only above `i64::MAX`).
    UInteger(u64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Pick the field type for a textual value.
    ///
    /// `true`/`false` become booleans, integral text integers, other
    /// numeric text floats, anything else a string.
    pub fn infer(text: &str) -> Self {
        match text {
            "true" => return Self::Boolean(true),
            "false" => return Self::Boolean(false),
            _ => {}
        }
        if let Ok(i) = text.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(u) = text.parse::<u64>() {
            return Self::UInteger(u);
        }
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::String(text.to_string()),
        }
    }

    /// Format this value for Line Protocol.
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::UInteger(v) => format!("{}u", v),
            FieldValue::String(v) => {
                let escaped = escape_line_breaks(&v.replace('\\', "\\\\").replace('"', "\\\""));
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
    /// Nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

impl Point {
    /// Create a point without tags or fields.
    pub fn new(measurement: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns,
        }
    }

    /// Add a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Add a field.
    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Encode as one Line Protocol line.
    ///
    /// Tags are sorted by key; fields keep their order.
    pub fn to_line(&self) -> Result<String, PointError> {
        if self.fields.is_empty() {
            return Err(PointError::NoFields(self.measurement.clone()));
        }

        let mut line = escape_measurement(&self.measurement);

        let mut sorted_tags: Vec<_> = self.tags.iter().collect();
        sorted_tags.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in sorted_tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        Ok(line)
    }
}

/// Spaces and commas are escaped in measurement names.
fn escape_measurement(s: &str) -> String {
    escape_line_breaks(&s.replace(',', "\\,").replace(' ', "\\ "))
}

/// Commas, equals signs and spaces are escaped in tag keys, tag values
/// and field keys.
fn escape_key(s: &str) -> String {
    escape_line_breaks(
        &s.replace(',', "\\,")
            .replace('=', "\\=")
            .replace(' ', "\\ "),
    )
}

/// A point is exactly one line: raw line breaks never reach the output.
fn escape_line_breaks(s: &str) -> String {
    s.replace('\n', "\\n").replace('\r', "\\r")
}
