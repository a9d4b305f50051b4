// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Loaded from YAML. Field mappings keep their declaration order, which
//! becomes the column/field order of every emitted record.

use crate::item_spec::ItemSpec;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("item '{item}': duplicate field name '{field}'")]
    DuplicateField { item: String, field: String },

    #[error("item '{item}': series '{field}' has length {found}, expected {expected}")]
    SeriesLengthMismatch {
        item: String,
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("item '{item}': series '{field}' is empty")]
    EmptySeries { item: String, field: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Bridge name (for identification in logs).
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Relational sink settings, required when any item has a `table`.
    #[serde(default)]
    pub relational: Option<RelationalConfig>,

    /// Time-series sink settings, required when any item has a `measurement`.
    #[serde(default)]
    pub timeseries: Option<TimeSeriesConfig>,

    /// Ingestion items.
    #[serde(default)]
    pub items: Vec<ItemConfig>,
}

fn default_bridge_name() -> String {
    "hdds-ingest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
            relational: None,
            timeseries: None,
            items: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validate the configuration.
    ///
    /// Every item must pass [`ItemSpec::from_config`], and each sink kind
    /// used by an item must have its section configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.items.is_empty() {
            return Err(ConfigError::Invalid("No items configured".into()));
        }

        for item in &self.items {
            ItemSpec::from_config(item)?;
        }

        if self.relational.is_none() && self.items.iter().any(|i| i.table.is_some()) {
            return Err(ConfigError::Invalid(
                "items write to a table but no 'relational' section is configured".into(),
            ));
        }

        if self.timeseries.is_none() && self.items.iter().any(|i| i.measurement.is_some()) {
            return Err(ConfigError::Invalid(
                "items write to a measurement but no 'timeseries' section is configured".into(),
            ));
        }

        Ok(())
    }

    /// Add an item.
    pub fn add_item(&mut self, item: ItemConfig) {
        self.items.push(item);
    }

    /// Example configuration, used by `gen-config`.
    pub fn example() -> Self {
        Self {
            name: "example-bridge".into(),
            relational: Some(RelationalConfig {
                path: "ingest.db".into(),
            }),
            timeseries: Some(TimeSeriesConfig::default()),
            items: vec![
                ItemConfig::table("pv/plant1+plant2/power", "power")
                    .topic_values("_/plant/_")
                    .payload("watts", "value")
                    .timestamp("ts")
                    .throttle_ms(1000),
                ItemConfig::measurement("battery/+/cells", "cell_voltage")
                    .topic_values("_/battery")
                    .constant_series("cell", ["1", "2", "3"])
                    .payload_series("voltage", ["cells[0]", "cells[1]", "cells[2]"])
                    .tag("battery")
                    .tag("cell"),
            ],
            ..Default::default()
        }
    }
}

/// Relational sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalConfig {
    /// SQLite database path (`:memory:` for a private in-memory database).
    pub path: String,
}

/// Time-series sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesConfig {
    /// Line protocol output: `-` for stdout, otherwise a file appended to.
    #[serde(default = "default_output")]
    pub output: String,

    /// Points buffered before a size-triggered flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time between flushes (milliseconds).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_output() -> String {
    "-".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Configuration for a single ingestion item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemConfig {
    /// Item label for logs and statistics (defaults to the topic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Subscription pattern; levels may list `+`-joined alternatives.
    pub topic: String,

    /// Relational destination table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Time-series destination measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<String>,

    /// Positional topic level bindings (`/`-joined names, `_` skips a level).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_values: Option<String>,

    /// Literal values; an array declares a series.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub const_values: OrderedMap<OneOrMany>,

    /// Payload paths; an array declares a series.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub payload_values: OrderedMap<OneOrMany>,

    /// Fields bound to the message capture time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamp_values: Vec<String>,

    /// Topic or constant fields written as time-series tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_values: Vec<String>,

    /// Field whose value sets the time-series point time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_value: Option<String>,

    /// Bus delivery QoS (0-2).
    #[serde(default)]
    pub qos: u8,

    /// Minimum time between accepted messages per received topic.
    #[serde(
        default,
        rename = "minValueTimeDiffMS",
        alias = "throttleMS",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_value_time_diff_ms: Option<u64>,

    /// Inbound queue capacity for this item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
}

impl ItemConfig {
    /// Create an item writing to a relational table.
    pub fn table(topic: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            table: Some(table.into()),
            ..Default::default()
        }
    }

    /// Create an item writing to a time-series measurement.
    pub fn measurement(topic: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            measurement: Some(measurement.into()),
            ..Default::default()
        }
    }

    /// Set the item label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set positional topic bindings.
    pub fn topic_values(mut self, bindings: impl Into<String>) -> Self {
        self.topic_values = Some(bindings.into());
        self
    }

    /// Add a constant field.
    pub fn constant(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.const_values
            .push(field, OneOrMany::One(Scalar(value.into())));
        self
    }

    /// Add a constant series.
    pub fn constant_series<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.const_values.push(field, OneOrMany::many(values));
        self
    }

    /// Add a payload field.
    pub fn payload(mut self, field: impl Into<String>, path: impl Into<String>) -> Self {
        self.payload_values
            .push(field, OneOrMany::One(Scalar(path.into())));
        self
    }

    /// Add a payload series.
    pub fn payload_series<I, S>(mut self, field: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload_values.push(field, OneOrMany::many(paths));
        self
    }

    /// Add a capture-time field.
    pub fn timestamp(mut self, field: impl Into<String>) -> Self {
        self.timestamp_values.push(field.into());
        self
    }

    /// Mark a topic or constant field as a time-series tag.
    pub fn tag(mut self, field: impl Into<String>) -> Self {
        self.tag_values.push(field.into());
        self
    }

    /// Use a field as the time-series point time.
    pub fn time_value(mut self, field: impl Into<String>) -> Self {
        self.time_value = Some(field.into());
        self
    }

    /// Set the bus QoS.
    pub fn qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    /// Set the per-topic throttle interval.
    pub fn throttle_ms(mut self, ms: u64) -> Self {
        self.min_value_time_diff_ms = Some(ms);
        self
    }

    /// Set the inbound queue capacity.
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }
}

/// A scalar configuration value, stored as text.
///
/// YAML numbers and booleans are accepted and kept in their textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar(pub String);

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Scalar, E> {
                Ok(Scalar(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// A single value or a series of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// Single value.
    One(Scalar),
    /// Series of values (fan-out).
    Many(Vec<Scalar>),
}

impl OneOrMany {
    fn many<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(values.into_iter().map(|v| Scalar(v.into())).collect())
    }
}

/// String-keyed map that keeps declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> OrderedMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    pub fn push(&mut self, key: impl Into<String>, value: V) {
        self.entries.push((key.into(), value));
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.push(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_YAML: &str = r#"
relational:
  path: ":memory:"
items:
  - topic: "A/B/C"
    table: values
    topicValues: "_/value01/_"
    constValues:
      value03: foo
    payloadValues:
      value02: "@this"
"#;

    const FULL_YAML: &str = r#"
name: plant-bridge
logLevel: debug
statsIntervalSecs: 0
relational:
  path: plant.db
timeseries:
  output: lines.txt
  batchSize: 50
  flushIntervalMs: 250
items:
  - topic: "pv/plant1+plant2/power"
    table: power
    topicValues: "_/plant/_"
    constValues:
      zeta: 1
      alpha: true
      unit: W
    payloadValues:
      watts: value
    timestampValues: [ts]
    minValueTimeDiffMS: 500
    qos: 1
  - topic: "battery/+/cells"
    measurement: cell_voltage
    topicValues: "_/battery"
    constValues:
      cell: ["1", "2"]
    payloadValues:
      voltage: ["cells[0]", "cells[1]"]
    tagValues: [battery, cell]
    throttleMS: 100
    queueDepth: 16
"#;

    #[test]
    fn test_config_parse_minimal() {
        let config = BridgeConfig::from_yaml(MINIMAL_YAML).expect("parse minimal yaml");

        assert_eq!(config.name, "hdds-ingest");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.stats_interval_secs, 10);
        assert!(config.timeseries.is_none());
        assert_eq!(config.items.len(), 1);

        let item = &config.items[0];
        assert_eq!(item.topic, "A/B/C");
        assert_eq!(item.table.as_deref(), Some("values"));
        assert_eq!(item.topic_values.as_deref(), Some("_/value01/_"));
        assert_eq!(item.qos, 0);
        assert!(item.min_value_time_diff_ms.is_none());
    }

    #[test]
    fn test_config_parse_all_fields() {
        let config = BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml");

        assert_eq!(config.name, "plant-bridge");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.stats_interval_secs, 0);

        let ts = config.timeseries.as_ref().expect("timeseries");
        assert_eq!(ts.output, "lines.txt");
        assert_eq!(ts.batch_size, 50);
        assert_eq!(ts.flush_interval_ms, 250);

        let power = &config.items[0];
        assert_eq!(power.min_value_time_diff_ms, Some(500));
        assert_eq!(power.qos, 1);
        assert_eq!(power.timestamp_values, vec!["ts"]);

        let cells = &config.items[1];
        assert_eq!(cells.measurement.as_deref(), Some("cell_voltage"));
        assert_eq!(cells.min_value_time_diff_ms, Some(100));
        assert_eq!(cells.queue_depth, Some(16));
        assert_eq!(cells.tag_values, vec!["battery", "cell"]);
    }

    #[test]
    fn test_const_values_keep_declaration_order() {
        let config = BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml");
        let keys: Vec<&str> = config.items[0].const_values.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "unit"]);
    }

    #[test]
    fn test_scalar_constants_are_stringified() {
        let config = BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml");
        let values: Vec<&OneOrMany> = config.items[0].const_values.iter().map(|(_, v)| v).collect();
        assert_eq!(values[0], &OneOrMany::One(Scalar("1".into())));
        assert_eq!(values[1], &OneOrMany::One(Scalar("true".into())));
        assert_eq!(values[2], &OneOrMany::One(Scalar("W".into())));
    }

    #[test]
    fn test_series_values_parse_as_many() {
        let config = BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml");
        let (_, voltage) = config.items[1]
            .payload_values
            .iter()
            .next()
            .expect("voltage");
        assert_eq!(
            voltage,
            &OneOrMany::Many(vec![Scalar("cells[0]".into()), Scalar("cells[1]".into())])
        );
    }

    #[test]
    fn test_config_validation_requires_items() {
        let config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_validation_requires_sink_sections() {
        let mut config = BridgeConfig::default();
        config.add_item(ItemConfig::table("a/b", "t").payload("v", "@this"));
        assert!(config.validate().is_err());

        config.relational = Some(RelationalConfig {
            path: ":memory:".into(),
        });
        assert!(config.validate().is_ok());

        config.add_item(ItemConfig::measurement("a/c", "m").payload("v", "@this"));
        assert!(config.validate().is_err());

        config.timeseries = Some(TimeSeriesConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_invalid_item() {
        let yaml = r#"
relational:
  path: ":memory:"
items:
  - topic: "a/b"
    table: t
    constValues:
      v: x
    payloadValues:
      v: "@this"
"#;
        let err = BridgeConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateField { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(MINIMAL_YAML.as_bytes()).expect("write");

        let config = BridgeConfig::from_file(file.path()).expect("load");
        assert_eq!(config.items.len(), 1);
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = BridgeConfig::from_file("/nonexistent/hdds-ingest.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = BridgeConfig::example();
        assert!(config.validate().is_ok());

        let yaml = serde_yaml::to_string(&config).expect("serialize");
        let parsed = BridgeConfig::from_yaml(&yaml).expect("reparse");
        assert_eq!(parsed.items.len(), 2);
        let keys: Vec<&str> = parsed.items[1].payload_values.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["voltage"]);
    }
}
