// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Ingestion Bridge
//!
//! Subscribes to message bus topics and turns each received message into
//! rows for a relational database or points for a time-series store.
//!
//! # Features
//!
//! - **Topic Expansion**: `a/x+y/b` subscribes `a/x/b` and `a/y/b`
//! - **Field Mapping**: values from topic levels, constants, JSON payload
//!   paths and capture time, in declaration order
//! - **Fan-out**: array-valued mappings produce one row per element
//! - **Throttling**: minimum interval per concrete topic
//! - **Sinks**: parameterized SQL inserts (SQLite) and InfluxDB Line Protocol
//!
//! # Quick Start
//!
//! ```bash
//! # Write an example configuration
//! hdds-ingest gen-config --output ingest.yaml
//!
//! # Run, reading "<topic> <body>" lines from stdin
//! hdds-ingest --config ingest.yaml
//! ```
//!
//! # Configuration File
//!
//! ```yaml
//! relational:
//!   path: ingest.db
//! items:
//!   - topic: pv/plant1+plant2/power
//!     table: power
//!     topicValues: _/plant/_
//!     payloadValues:
//!       watts: value
//!     timestampValues: [ts]
//!     minValueTimeDiffMS: 1000
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod emit;
pub mod extract;
pub mod item;
pub mod item_spec;
pub mod path;
pub mod sink;
pub mod throttle;
pub mod topic;

pub use bridge::{Bridge, BridgeError, BridgeHandle, Sinks};
pub use bus::{BusError, InMemoryBus, Message, MessageBus, QoS, SubscriptionId};
pub use config::{BridgeConfig, ConfigError, ItemConfig};
pub use emit::{Emitter, InsertStatement, SqlDialect};
pub use extract::{extract, ExtractError, ValueGroup};
pub use item::{IngestItem, ItemStats, ItemStatsSnapshot};
pub use item_spec::{ItemSpec, SinkTarget, ValueSource};
pub use sink::{LineProtocolSink, Point, RelationalSink, SqliteSink, TimeSeriesSink};
pub use throttle::ThrottleGate;
