// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink abstraction.
//!
//! Items write either to a relational sink (parameterized statements) or
//! to a time-series sink (points). Backends implement one of the traits:
//!
//! - [`SqliteSink`] -- relational, embedded SQLite
//! - [`LineProtocolSink`] -- time-series, buffered InfluxDB Line Protocol

pub mod buffer;
pub mod line_protocol;
pub mod sqlite;
pub mod timeseries;

pub use buffer::BatchBuffer;
pub use line_protocol::{FieldValue, Point, PointError};
pub use sqlite::SqliteSink;
pub use timeseries::LineProtocolSink;

use crate::emit::SqlDialect;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Relational sink.
///
/// `query` may block; callers run it off the message delivery path.
pub trait RelationalSink: Send + Sync {
    /// Execute a statement with positional text parameters, returning the
    /// number of affected rows.
    fn query(&self, sql: &str, params: &[String]) -> Result<usize>;

    /// Statement dialect this sink understands.
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }
}

/// Time-series sink with its own buffering.
pub trait TimeSeriesSink: Send + Sync {
    /// Queue a point for writing. Must not block on output.
    fn write_point(&self, point: Point) -> Result<()>;

    /// Write out everything queued, returning the number of points.
    fn flush(&self) -> Result<usize>;

    /// Flush only if the sink's own interval has elapsed.
    fn flush_if_due(&self) -> Result<usize> {
        Ok(0)
    }

    /// How often [`TimeSeriesSink::flush_if_due`] should be polled, if at all.
    fn flush_interval(&self) -> Option<Duration> {
        None
    }

    /// Signalled when a full batch is waiting, so the flusher can write it
    /// without waiting for the next interval.
    fn batch_ready(&self) -> Option<Arc<Notify>> {
        None
    }
}
