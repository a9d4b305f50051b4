// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record emission.
//!
//! Relational items produce one parameterized `INSERT` per row:
//!
//! ```text
//! INSERT INTO "t" ("c1", "c2", "c3") VALUES ($1, $2, to_timestamp($3))
//! ```
//!
//! Identifiers are double-quoted so reserved words (`order`, `group`)
//! work as table and column names. Columns follow the row's field order. Every value is bound as a text
//! parameter; timestamp columns are wrapped in the dialect's epoch
//! conversion. Writes are dispatched to the blocking pool and never
//! awaited by the message path.
//!
//! Time-series items produce one [`Point`] per row.

use crate::extract::ValueGroup;
use crate::item::ItemStats;
use crate::item_spec::ItemSpec;
use crate::sink::{FieldValue, Point, RelationalSink, TimeSeriesSink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// SQL flavor of a relational sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// `$n` placeholders, `to_timestamp($n)`.
    Postgres,
    /// `?n` placeholders, `datetime(CAST(?n AS REAL), 'unixepoch')`.
    Sqlite,
}

impl SqlDialect {
    /// Positional placeholder for a 1-based parameter index.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::Sqlite => format!("?{}", index),
        }
    }

    /// Placeholder converting epoch seconds to a timestamp.
    pub fn timestamp_placeholder(self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("to_timestamp(${})", index),
            SqlDialect::Sqlite => format!("datetime(CAST(?{} AS REAL), 'unixepoch')", index),
        }
    }
}

/// A parameterized insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub params: Vec<String>,
}

impl InsertStatement {
    /// Build the insert for one row.
    pub fn build(
        table: &str,
        row: &ValueGroup,
        timestamp_fields: &[String],
        dialect: SqlDialect,
    ) -> Self {
        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());

        for (i, (name, value)) in row.iter().enumerate() {
            let index = i + 1;
            columns.push(quote_identifier(name));
            if timestamp_fields.iter().any(|t| t == name) {
                placeholders.push(dialect.timestamp_placeholder(index));
            } else {
                placeholders.push(dialect.placeholder(index));
            }
            params.push(value.to_string());
        }

        Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_identifier(table),
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        }
    }
}

/// Double-quote each part of a possibly schema-qualified identifier.
/// Embedded quotes are doubled.
fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Parse a point time: Unix seconds (fractional allowed) or RFC 3339.
fn parse_time_ns(text: &str) -> Option<i64> {
    if let Ok(secs) = text.parse::<f64>() {
        if secs.is_finite() {
            return Some((secs * 1e9).round() as i64);
        }
        return None;
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .and_then(|t| t.timestamp_nanos_opt())
}

/// Build the time-series point for one row.
///
/// Tag fields become tags, except empty values, which Line Protocol
/// cannot carry and are left out. Timestamp fields and the time field are not
/// written as fields. The point time comes from the time field when it
/// parses, else from `captured_at`.
pub fn build_point(spec: &ItemSpec, row: &ValueGroup, captured_at: DateTime<Utc>) -> Point {
    let fallback = captured_at.timestamp_nanos_opt().unwrap_or_default();
    let timestamp_ns = match spec.time_field().and_then(|f| row.get(f)) {
        Some(text) => parse_time_ns(text).unwrap_or_else(|| {
            tracing::debug!(
                "[{}] Unparseable time value '{}', using capture time",
                spec.name(),
                text
            );
            fallback
        }),
        None => fallback,
    };

    let mut point = Point::new(spec.target().name(), timestamp_ns);
    for (name, value) in row.iter() {
        if spec.tag_fields().iter().any(|t| t == name) {
            if value.is_empty() {
                tracing::trace!("[{}] Skipping empty tag '{}'", spec.name(), name);
                continue;
            }
            point = point.tag(name, value);
        } else if spec.time_field() == Some(name)
            || spec.timestamp_fields().iter().any(|t| t == name)
        {
            continue;
        } else {
            point = point.field(name, FieldValue::infer(value));
        }
    }
    point
}

/// Writes rows to the sink an item targets.
#[derive(Clone)]
pub enum Emitter {
    Relational {
        sink: Arc<dyn RelationalSink>,
        table: String,
    },
    TimeSeries {
        sink: Arc<dyn TimeSeriesSink>,
    },
}

impl Emitter {
    /// Emit one row.
    ///
    /// Relational writes run on the blocking pool; the returned handle may
    /// be dropped. Failures are logged with the statement and parameters
    /// and counted, never retried.
    pub fn emit(
        &self,
        spec: &ItemSpec,
        row: &ValueGroup,
        captured_at: DateTime<Utc>,
        stats: &Arc<ItemStats>,
    ) -> Option<JoinHandle<()>> {
        match self {
            Emitter::Relational { sink, table } => {
                let statement =
                    InsertStatement::build(table, row, spec.timestamp_fields(), sink.dialect());
                let sink = Arc::clone(sink);
                let stats = Arc::clone(stats);
                let item = spec.name().to_string();

                Some(tokio::task::spawn_blocking(move || {
                    match sink.query(&statement.sql, &statement.params) {
                        Ok(_) => stats.record_written(),
                        Err(e) => {
                            stats.record_write_error();
                            tracing::error!(
                                "[{}] Insert failed: {} (sql: {}, params: {:?})",
                                item,
                                e,
                                statement.sql,
                                statement.params
                            );
                        }
                    }
                }))
            }
            Emitter::TimeSeries { sink } => {
                let point = build_point(spec, row, captured_at);
                match sink.write_point(point) {
                    Ok(()) => stats.record_written(),
                    Err(e) => {
                        stats.record_write_error();
                        tracing::error!("[{}] Point write failed: {}", spec.name(), e);
                    }
                }
                None
            }
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Emitter::Relational { table, .. } => {
                f.debug_struct("Relational").field("table", table).finish()
            }
            Emitter::TimeSeries { .. } => f.debug_struct("TimeSeries").finish(),
        }
    }
}
