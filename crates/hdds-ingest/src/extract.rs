// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Value extraction.
//!
//! Turns one accepted message into the rows an item emits:
//!
//! ```text
//! constants -> topic levels -> payload paths -> series[i] -> timestamps
//! ```
//!
//! An item without series yields one row per message. An item with
//! series of length N yields N rows, row `i` carrying the `i`-th value of
//! every series and the same single-valued fields.

use crate::bus::Message;
use crate::item_spec::{ItemSpec, ValueSource};
use crate::path::{self, UNDEFINED, WHOLE_BODY};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Extraction errors. The message is dropped, no rows are emitted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Ordered field name to value mapping for one output row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueGroup {
    entries: Vec<(String, String)>,
}

impl ValueGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. An existing field keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Field names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, v)| v.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ValueGroup {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut group = Self::new();
        for (k, v) in iter {
            group.insert(k, v);
        }
        group
    }
}

/// Render a capture instant as Unix seconds with millisecond precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("{}.{:03}", at.timestamp(), at.timestamp_subsec_millis())
}

/// Message body, parsed as JSON on first use.
struct Payload<'a> {
    raw: &'a str,
    parsed: Option<Value>,
}

impl<'a> Payload<'a> {
    fn new(raw: &'a str) -> Self {
        Self { raw, parsed: None }
    }

    /// Resolve a configured path.
    ///
    /// A path that does not resolve yields the literal `undefined`.
    fn resolve(&mut self, path: &str) -> Result<String, ExtractError> {
        if path == WHOLE_BODY {
            return Ok(self.raw.to_string());
        }

        let parsed = match &mut self.parsed {
            Some(value) => value,
            slot @ None => slot.insert(serde_json::from_str(self.raw)?),
        };

        Ok(path::lookup(parsed, path)
            .map(path::render)
            .unwrap_or_else(|| UNDEFINED.to_string()))
    }
}

/// Build the rows for one accepted message.
///
/// All rows share `captured_at` for their timestamp fields.
pub fn extract(
    spec: &ItemSpec,
    message: &Message,
    captured_at: DateTime<Utc>,
) -> Result<Vec<ValueGroup>, ExtractError> {
    let segments = message.segments();
    let mut payload = Payload::new(&message.body);

    let mut base = ValueGroup::new();
    for field in spec.fields() {
        match &field.source {
            ValueSource::Constant(value) => base.insert(&field.name, value.as_str()),
            ValueSource::TopicSegment(position) => {
                if let Some(segment) = segments.get(*position) {
                    base.insert(&field.name, *segment);
                }
            }
            ValueSource::PayloadPath(p) => base.insert(&field.name, payload.resolve(p)?),
            ValueSource::ConstantSeries(_)
            | ValueSource::PayloadPathSeries(_)
            | ValueSource::Timestamp => {}
        }
    }

    let mut rows = match spec.series_len() {
        None => vec![base],
        Some(len) => {
            let mut rows = Vec::with_capacity(len);
            for i in 0..len {
                let mut row = base.clone();
                for field in spec.fields() {
                    match &field.source {
                        ValueSource::ConstantSeries(values) => {
                            row.insert(&field.name, values[i].as_str())
                        }
                        ValueSource::PayloadPathSeries(paths) => {
                            row.insert(&field.name, payload.resolve(&paths[i])?)
                        }
                        _ => {}
                    }
                }
                rows.push(row);
            }
            rows
        }
    };

    if !spec.timestamp_fields().is_empty() {
        let stamp = format_timestamp(captured_at);
        for row in &mut rows {
            for field in spec.timestamp_fields() {
                row.insert(field, stamp.as_str());
            }
        }
    }

    Ok(rows)
}
