// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Validated, immutable form of an [`ItemConfig`].
//!
//! All mapping rules are checked here, once, when an item is built:
//!
//! - destination field names are unique across topic, constant, payload
//!   and timestamp mappings
//! - every series (array-valued constant or payload mapping) has the same
//!   non-zero length
//! - the item has exactly one sink target
//!
//! A failed check aborts construction of the whole item.

use crate::bus::QoS;
use crate::config::{ConfigError, ItemConfig, OneOrMany, Scalar};
use crate::topic;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

/// Topic level binding that skips the level.
pub const SKIP_MARKER: &str = "_";

/// Default per-item inbound queue capacity.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Where a field value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Literal value.
    Constant(String),
    /// Literal series, one value per output row.
    ConstantSeries(Vec<String>),
    /// Level of the received topic.
    TopicSegment(usize),
    /// Path resolved against the message body.
    PayloadPath(String),
    /// Path series, one path per output row.
    PayloadPathSeries(Vec<String>),
    /// Message capture time.
    Timestamp,
}

impl ValueSource {
    /// True for the array-valued variants.
    pub fn is_series(&self) -> bool {
        matches!(self, Self::ConstantSeries(_) | Self::PayloadPathSeries(_))
    }

    fn series_len(&self) -> Option<usize> {
        match self {
            Self::ConstantSeries(v) | Self::PayloadPathSeries(v) => Some(v.len()),
            _ => None,
        }
    }
}

/// A destination field and its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSource {
    pub name: String,
    pub source: ValueSource,
}

/// Sink destination of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// Relational table.
    Table(String),
    /// Time-series measurement.
    Measurement(String),
}

impl SinkTarget {
    /// Table or measurement name.
    pub fn name(&self) -> &str {
        match self {
            Self::Table(name) | Self::Measurement(name) => name,
        }
    }
}

/// Validated item definition.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    name: String,
    topic: String,
    patterns: Vec<String>,
    target: SinkTarget,
    fields: Vec<FieldSource>,
    series_len: Option<usize>,
    timestamp_fields: Vec<String>,
    tag_fields: Vec<String>,
    time_field: Option<String>,
    qos: QoS,
    throttle: Option<Duration>,
    queue_depth: usize,
}

fn sql_identifier() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("identifier regex is valid")
    })
}

impl ItemSpec {
    /// Validate an item configuration.
    pub fn from_config(config: &ItemConfig) -> Result<Self, ConfigError> {
        let name = config.name.clone().unwrap_or_else(|| config.topic.clone());
        let invalid = |reason: String| ConfigError::Invalid(format!("item '{}': {}", name, reason));

        if config.topic.is_empty() {
            return Err(invalid("empty topic".into()));
        }

        let target = match (&config.table, &config.measurement) {
            (Some(_), Some(_)) => {
                return Err(invalid("both 'table' and 'measurement' are set".into()))
            }
            (None, None) => return Err(invalid("no 'table' or 'measurement' set".into())),
            (Some(table), None) if table.is_empty() => return Err(invalid("empty table".into())),
            (None, Some(m)) if m.is_empty() => return Err(invalid("empty measurement".into())),
            (Some(table), None) => SinkTarget::Table(table.clone()),
            (None, Some(m)) => SinkTarget::Measurement(m.clone()),
        };

        let qos = QoS::try_from(config.qos)
            .map_err(|level| invalid(format!("qos {} out of range 0-2", level)))?;

        // Canonical order: constants, topic levels, single payload paths,
        // constant series, payload series, timestamps.
        let mut fields = Vec::new();
        let mut series = Vec::new();

        for (field, value) in config.const_values.iter() {
            match value {
                OneOrMany::One(Scalar(v)) => fields.push(FieldSource {
                    name: field.to_string(),
                    source: ValueSource::Constant(v.clone()),
                }),
                OneOrMany::Many(values) => series.push(FieldSource {
                    name: field.to_string(),
                    source: ValueSource::ConstantSeries(scalars(values)),
                }),
            }
        }

        if let Some(bindings) = &config.topic_values {
            for (position, field) in topic::segments(bindings).into_iter().enumerate() {
                if field.is_empty() || field == SKIP_MARKER {
                    continue;
                }
                fields.push(FieldSource {
                    name: field.to_string(),
                    source: ValueSource::TopicSegment(position),
                });
            }
        }

        let mut payload_series = Vec::new();
        for (field, value) in config.payload_values.iter() {
            match value {
                OneOrMany::One(Scalar(path)) => fields.push(FieldSource {
                    name: field.to_string(),
                    source: ValueSource::PayloadPath(path.clone()),
                }),
                OneOrMany::Many(paths) => payload_series.push(FieldSource {
                    name: field.to_string(),
                    source: ValueSource::PayloadPathSeries(scalars(paths)),
                }),
            }
        }

        fields.extend(series);
        fields.extend(payload_series);
        fields.extend(config.timestamp_values.iter().map(|field| FieldSource {
            name: field.clone(),
            source: ValueSource::Timestamp,
        }));

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    item: name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let mut series_len = None;
        for field in &fields {
            let Some(len) = field.source.series_len() else {
                continue;
            };
            if len == 0 {
                return Err(ConfigError::EmptySeries {
                    item: name.clone(),
                    field: field.name.clone(),
                });
            }
            match series_len {
                None => series_len = Some(len),
                Some(expected) if expected != len => {
                    return Err(ConfigError::SeriesLengthMismatch {
                        item: name.clone(),
                        field: field.name.clone(),
                        expected,
                        found: len,
                    });
                }
                Some(_) => {}
            }
        }

        for tag in &config.tag_values {
            let taggable = fields.iter().any(|f| {
                &f.name == tag
                    && matches!(
                        f.source,
                        ValueSource::Constant(_)
                            | ValueSource::ConstantSeries(_)
                            | ValueSource::TopicSegment(_)
                    )
            });
            if !taggable {
                return Err(invalid(format!(
                    "tag '{}' is not a topic or constant field",
                    tag
                )));
            }
        }

        if let Some(time_field) = &config.time_value {
            if !fields.iter().any(|f| &f.name == time_field) {
                return Err(invalid(format!(
                    "time value '{}' is not a declared field",
                    time_field
                )));
            }
        }

        if let SinkTarget::Table(table) = &target {
            if !sql_identifier().is_match(table) {
                return Err(invalid(format!("table '{}' is not a valid identifier", table)));
            }
            if let Some(bad) = fields.iter().find(|f| !sql_identifier().is_match(&f.name)) {
                return Err(invalid(format!(
                    "column '{}' is not a valid identifier",
                    bad.name
                )));
            }
        }

        if fields.is_empty() {
            return Err(invalid("no fields mapped".into()));
        }

        let queue_depth = config.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH);
        if queue_depth == 0 {
            return Err(invalid("queue depth must be at least 1".into()));
        }

        Ok(Self {
            name,
            patterns: topic::expand(&config.topic),
            topic: config.topic.clone(),
            target,
            fields,
            series_len,
            timestamp_fields: config.timestamp_values.clone(),
            tag_fields: config.tag_values.clone(),
            time_field: config.time_value.clone(),
            qos,
            throttle: config.min_value_time_diff_ms.map(Duration::from_millis),
            queue_depth,
        })
    }

    /// Item label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic pattern as configured.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Concrete bus patterns derived from the topic.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Sink target.
    pub fn target(&self) -> &SinkTarget {
        &self.target
    }

    /// Field sources in emission order.
    pub fn fields(&self) -> &[FieldSource] {
        &self.fields
    }

    /// Common series length, if the item fans out.
    pub fn series_len(&self) -> Option<usize> {
        self.series_len
    }

    /// Number of rows each accepted message produces.
    pub fn rows_per_message(&self) -> usize {
        self.series_len.unwrap_or(1)
    }

    /// Fields bound to capture time.
    pub fn timestamp_fields(&self) -> &[String] {
        &self.timestamp_fields
    }

    /// Fields written as time-series tags.
    pub fn tag_fields(&self) -> &[String] {
        &self.tag_fields
    }

    /// Field that sets the time-series point time.
    pub fn time_field(&self) -> Option<&str> {
        self.time_field.as_deref()
    }

    /// Bus QoS.
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Throttle interval.
    pub fn throttle(&self) -> Option<Duration> {
        self.throttle
    }

    /// Inbound queue capacity.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
}

fn scalars(values: &[Scalar]) -> Vec<String> {
    values.iter().map(|Scalar(v)| v.clone()).collect()
}
