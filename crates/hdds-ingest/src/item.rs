// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion item runtime.
//!
//! An item owns its throttle state and emitter. Messages for one item are
//! handled one at a time, in arrival order, from the item's own queue.

use crate::bus::{BusError, Message, MessageBus, SubscriptionId};
use crate::emit::Emitter;
use crate::extract::extract;
use crate::item_spec::ItemSpec;
use crate::throttle::ThrottleGate;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Statistics for an item.
#[derive(Debug)]
pub struct ItemStats {
    /// Item label.
    pub item: String,

    /// Messages delivered to the item.
    pub messages_received: AtomicU64,

    /// Messages rejected by the throttle.
    pub messages_throttled: AtomicU64,

    /// Messages dropped because the payload could not be read.
    pub extraction_errors: AtomicU64,

    /// Rows produced by extraction.
    pub rows_extracted: AtomicU64,

    /// Rows the sink accepted.
    pub rows_written: AtomicU64,

    /// Rows the sink rejected.
    pub write_errors: AtomicU64,

    /// Item start time.
    pub created: Instant,
}

impl ItemStats {
    /// Create new stats.
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            messages_received: AtomicU64::new(0),
            messages_throttled: AtomicU64::new(0),
            extraction_errors: AtomicU64::new(0),
            rows_extracted: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_written(&self) {
        self.rows_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> ItemStatsSnapshot {
        ItemStatsSnapshot {
            item: self.item.clone(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_throttled: self.messages_throttled.load(Ordering::Relaxed),
            extraction_errors: self.extraction_errors.load(Ordering::Relaxed),
            rows_extracted: self.rows_extracted.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for ItemStats {
    fn default() -> Self {
        Self::new("")
    }
}

/// Snapshot of item statistics.
#[derive(Debug, Clone)]
pub struct ItemStatsSnapshot {
    pub item: String,
    pub messages_received: u64,
    pub messages_throttled: u64,
    pub extraction_errors: u64,
    pub rows_extracted: u64,
    pub rows_written: u64,
    pub write_errors: u64,
    pub uptime_secs: u64,
}

impl ItemStatsSnapshot {
    /// Calculate messages per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Messages that passed the throttle.
    pub fn messages_accepted(&self) -> u64 {
        self.messages_received
            .saturating_sub(self.messages_throttled)
    }
}

/// A running ingestion item.
pub struct IngestItem {
    spec: Arc<ItemSpec>,
    throttle: ThrottleGate,
    emitter: Emitter,
    stats: Arc<ItemStats>,
}

impl IngestItem {
    /// Create an item from its validated definition.
    pub fn new(spec: ItemSpec, emitter: Emitter) -> Self {
        let stats = Arc::new(ItemStats::new(spec.name()));
        Self {
            throttle: ThrottleGate::new(spec.throttle()),
            spec: Arc::new(spec),
            emitter,
            stats,
        }
    }

    pub fn spec(&self) -> &ItemSpec {
        &self.spec
    }

    /// Shared statistics handle.
    pub fn stats(&self) -> Arc<ItemStats> {
        Arc::clone(&self.stats)
    }

    /// Subscribe every expanded pattern of this item to `bus`.
    ///
    /// Subscriptions made before a failure are rolled back.
    pub fn subscribe(
        &self,
        bus: &dyn MessageBus,
        sender: mpsc::Sender<Message>,
    ) -> Result<Vec<SubscriptionId>, BusError> {
        let mut ids = Vec::with_capacity(self.spec.patterns().len());
        for pattern in self.spec.patterns() {
            match bus.subscribe(pattern, self.spec.qos(), sender.clone()) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        if let Err(err) = bus.unsubscribe(id) {
                            tracing::warn!(
                                "[{}] Failed to roll back subscription {}: {}",
                                self.spec.name(),
                                id,
                                err
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "[{}] Subscribed to {} pattern(s): {}",
            self.spec.name(),
            ids.len(),
            self.spec.patterns().join(", ")
        );
        Ok(ids)
    }

    /// Handle one delivered message.
    ///
    /// Returns the handles of dispatched relational writes. Time-series
    /// points are queued on the sink before this returns.
    pub fn handle_message(
        &mut self,
        message: &Message,
        now: Instant,
        captured_at: DateTime<Utc>,
    ) -> Vec<JoinHandle<()>> {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        if !self.throttle.admit(&message.topic, now) {
            self.stats.messages_throttled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("[{}] Throttled message on {}", self.spec.name(), message.topic);
            return Vec::new();
        }

        let rows = match extract(&self.spec, message, captured_at) {
            Ok(rows) => rows,
            Err(e) => {
                self.stats.extraction_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[{}] Dropping message on {}: {}",
                    self.spec.name(),
                    message.topic,
                    e
                );
                return Vec::new();
            }
        };

        self.stats
            .rows_extracted
            .fetch_add(rows.len() as u64, Ordering::Relaxed);

        rows.iter()
            .filter_map(|row| self.emitter.emit(&self.spec, row, captured_at, &self.stats))
            .collect()
    }

    /// Handle a message received now.
    pub fn on_message(&mut self, message: &Message) -> Vec<JoinHandle<()>> {
        self.handle_message(message, Instant::now(), Utc::now())
    }

    /// Process messages until the queue closes.
    ///
    /// Returns the handles of relational writes still in flight.
    pub async fn run(mut self, mut receiver: mpsc::Receiver<Message>) -> Vec<JoinHandle<()>> {
        let mut pending = Vec::new();
        while let Some(message) = receiver.recv().await {
            pending.retain(|h: &JoinHandle<()>| !h.is_finished());
            pending.extend(self.on_message(&message));
        }
        tracing::debug!("[{}] Queue closed", self.spec.name());
        pending
    }
}

impl std::fmt::Debug for IngestItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestItem")
            .field("name", &self.spec.name())
            .field("emitter", &self.emitter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BrokenBus, InMemoryBus};
    use crate::config::ItemConfig;
    use crate::sink::timeseries::SharedBuffer;
    use crate::sink::{LineProtocolSink, SqliteSink, TimeSeriesSink};
    use chrono::TimeZone;
    use std::time::Duration;

    fn at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn line_item(config: ItemConfig) -> (IngestItem, Arc<LineProtocolSink>, SharedBuffer) {
        let out = SharedBuffer::new();
        let sink = Arc::new(LineProtocolSink::with_writer(
            Box::new(out.clone()),
            1,
            Duration::from_secs(60),
        ));
        let spec = ItemSpec::from_config(&config).unwrap();
        let emitter = Emitter::TimeSeries { sink: sink.clone() };
        (IngestItem::new(spec, emitter), sink, out)
    }

    #[test]
    fn test_throttle_per_topic() {
        let (mut item, sink, out) = line_item(
            ItemConfig::measurement("plant/+/power", "power")
                .topic_values("_/plant")
                .payload("w", "@this")
                .tag("plant")
                .throttle_ms(100),
        );
        let t0 = Instant::now();

        item.handle_message(&Message::new("plant/a/power", "1"), t0, at());
        item.handle_message(
            &Message::new("plant/a/power", "2"),
            t0 + Duration::from_millis(50),
            at(),
        );
        item.handle_message(
            &Message::new("plant/b/power", "3"),
            t0 + Duration::from_millis(50),
            at(),
        );
        item.handle_message(
            &Message::new("plant/a/power", "4"),
            t0 + Duration::from_millis(150),
            at(),
        );

        assert_eq!(sink.flush().unwrap(), 3);
        let lines = out.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("power,plant=a w=1i"));
        assert!(lines[1].starts_with("power,plant=b w=3i"));
        assert!(lines[2].starts_with("power,plant=a w=4i"));

        let stats = item.stats().snapshot();
        assert_eq!(stats.messages_received, 4);
        assert_eq!(stats.messages_throttled, 1);
        assert_eq!(stats.messages_accepted(), 3);
        assert_eq!(stats.rows_written, 3);
    }

    #[test]
    fn test_bad_payload_is_counted_and_dropped() {
        let (mut item, sink, out) =
            line_item(ItemConfig::measurement("a", "m").payload("v", "value"));
        let handles = item.handle_message(&Message::new("a", "{oops"), Instant::now(), at());

        assert!(handles.is_empty());
        assert_eq!(sink.flush().unwrap(), 0);
        assert!(out.lines().is_empty());
        let stats = item.stats().snapshot();
        assert_eq!(stats.extraction_errors, 1);
        assert_eq!(stats.rows_extracted, 0);
    }

    #[test]
    fn test_subscribe_all_patterns() {
        let (item, _, _) = line_item(
            ItemConfig::measurement("pv/a+b/power", "m").payload("v", "@this"),
        );
        let bus = InMemoryBus::new();
        let (tx, _rx) = mpsc::channel(4);

        let ids = item.subscribe(&bus, tx).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(bus.patterns(), vec!["pv/a/power", "pv/b/power"]);
    }

    #[test]
    fn test_subscribe_rolls_back_on_error() {
        let (item, _, _) = line_item(
            ItemConfig::measurement("a/b+#/c", "m").payload("v", "@this"),
        );
        let bus = InMemoryBus::new();
        let (tx, _rx) = mpsc::channel(4);

        assert!(item.subscribe(&bus, tx).is_err());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_subscribe_rollback_failure_keeps_original_error() {
        let (item, _, _) = line_item(
            ItemConfig::measurement("a/b+c+d", "m").payload("v", "@this"),
        );
        let bus = BrokenBus::new(2);
        let (tx, _rx) = mpsc::channel(4);

        let err = item.subscribe(&bus, tx).unwrap_err();
        assert!(matches!(err, BusError::InvalidPattern(ref p) if p == "a/d"));
        assert_eq!(
            *bus.unsubscribe_attempts.lock().unwrap(),
            vec![SubscriptionId(1), SubscriptionId(2)]
        );
    }

    #[tokio::test]
    async fn test_run_fans_out_to_sqlite() {
        let sqlite = Arc::new(SqliteSink::new_in_memory().unwrap());
        sqlite
            .execute_batch("CREATE TABLE cells (battery TEXT, cell TEXT, volts TEXT)")
            .unwrap();
        let spec = ItemSpec::from_config(
            &ItemConfig::table("bat/+", "cells")
                .topic_values("_/battery")
                .constant_series("cell", ["1", "2"])
                .payload_series("volts", ["v[0]", "v[1]"]),
        )
        .unwrap();
        let item = IngestItem::new(
            spec,
            Emitter::Relational {
                sink: sqlite.clone(),
                table: "cells".into(),
            },
        );
        let stats = item.stats();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(item.run(rx));
        tx.send(Message::new("bat/b1", r#"{"v": [3.3, 3.4]}"#))
            .await
            .unwrap();
        drop(tx);

        for handle in task.await.unwrap() {
            handle.await.unwrap();
        }

        let count: i64 = sqlite
            .with_connection(|c| c.query_row("SELECT COUNT(*) FROM cells", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(stats.snapshot().rows_extracted, 2);
    }
}
