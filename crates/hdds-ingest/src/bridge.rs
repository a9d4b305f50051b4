// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge runtime.
//!
//! The bridge builds one [`IngestItem`] per configured item, subscribes
//! its expanded topics on the bus and drives it from a dedicated task fed
//! by a bounded queue. Items share the sinks but nothing else.

use crate::bus::{BusError, MessageBus, SubscriptionId};
use crate::config::{BridgeConfig, ConfigError};
use crate::emit::Emitter;
use crate::item::{IngestItem, ItemStats, ItemStatsSnapshot};
use crate::item_spec::{ItemSpec, SinkTarget};
use crate::sink::{LineProtocolSink, RelationalSink, SqliteSink, TimeSeriesSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Sink error: {0}")]
    Sink(#[from] anyhow::Error),

    #[error("Item '{0}' needs a {1} sink but none is available")]
    MissingSink(String, &'static str),

    #[error("Bridge already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const MIN_FLUSH_PERIOD: Duration = Duration::from_millis(10);
const IDLE_FLUSH_PERIOD: Duration = Duration::from_secs(1);

/// Sinks shared by all items.
#[derive(Clone, Default)]
pub struct Sinks {
    pub relational: Option<Arc<dyn RelationalSink>>,
    pub timeseries: Option<Arc<dyn TimeSeriesSink>>,
}

impl Sinks {
    /// Open the sinks named in the configuration.
    pub fn open(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let relational = match &config.relational {
            Some(rel) => {
                let sink = SqliteSink::new(&rel.path)?;
                tracing::info!("Relational sink: SQLite at {}", rel.path);
                Some(Arc::new(sink) as Arc<dyn RelationalSink>)
            }
            None => None,
        };

        let timeseries = match &config.timeseries {
            Some(ts) => {
                let sink = LineProtocolSink::from_config(ts)?;
                tracing::info!(
                    "Time-series sink: line protocol to {} (batch {}, every {}ms)",
                    ts.output,
                    ts.batch_size,
                    ts.flush_interval_ms
                );
                Some(Arc::new(sink) as Arc<dyn TimeSeriesSink>)
            }
            None => None,
        };

        Ok(Self {
            relational,
            timeseries,
        })
    }

    /// Use a relational sink.
    pub fn with_relational(mut self, sink: Arc<dyn RelationalSink>) -> Self {
        self.relational = Some(sink);
        self
    }

    /// Use a time-series sink.
    pub fn with_timeseries(mut self, sink: Arc<dyn TimeSeriesSink>) -> Self {
        self.timeseries = Some(sink);
        self
    }

    fn emitter_for(&self, spec: &ItemSpec) -> Result<Emitter, BridgeError> {
        match spec.target() {
            SinkTarget::Table(table) => {
                let sink = self.relational.clone().ok_or_else(|| {
                    BridgeError::MissingSink(spec.name().to_string(), "relational")
                })?;
                Ok(Emitter::Relational {
                    sink,
                    table: table.clone(),
                })
            }
            SinkTarget::Measurement(_) => {
                let sink = self.timeseries.clone().ok_or_else(|| {
                    BridgeError::MissingSink(spec.name().to_string(), "time-series")
                })?;
                Ok(Emitter::TimeSeries { sink })
            }
        }
    }
}

/// Handle to control a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    running: Arc<AtomicBool>,
    bus: Arc<dyn MessageBus>,
    subscriptions: Arc<Mutex<Vec<SubscriptionId>>>,
    stats: Arc<Vec<Arc<ItemStats>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<Vec<JoinHandle<()>>>>>>,
    flusher: Arc<Mutex<Option<JoinHandle<()>>>>,
    timeseries: Option<Arc<dyn TimeSeriesSink>>,
}

impl BridgeHandle {
    /// Check if bridge is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get item statistics.
    pub fn stats(&self) -> Vec<ItemStatsSnapshot> {
        self.stats.iter().map(|s| s.snapshot()).collect()
    }

    /// Stop accepting messages.
    ///
    /// Every subscription is removed; item tasks finish once their queues
    /// drain.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);

        let ids: Vec<SubscriptionId> = match self.subscriptions.lock() {
            Ok(mut subs) => subs.drain(..).collect(),
            Err(_) => return,
        };
        for id in ids {
            if let Err(e) = self.bus.unsubscribe(id) {
                tracing::warn!("Failed to unsubscribe {}: {}", id, e);
            }
        }
    }

    /// Stop, wait for queued messages and in-flight writes, then flush the
    /// time-series sink.
    pub async fn shutdown(&self) {
        self.stop();

        let tasks: Vec<_> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            match task.await {
                Ok(writes) => {
                    for write in writes {
                        if let Err(e) = write.await {
                            tracing::error!("Write task failed: {}", e);
                        }
                    }
                }
                Err(e) => tracing::error!("Item task failed: {}", e),
            }
        }

        if let Some(flusher) = self.flusher.lock().ok().and_then(|mut f| f.take()) {
            flusher.abort();
        }
        if let Some(sink) = &self.timeseries {
            match sink.flush() {
                Ok(n) if n > 0 => tracing::info!("Flushed {} pending points", n),
                Ok(_) => {}
                Err(e) => tracing::error!("Final time-series flush failed: {}", e),
            }
        }
    }
}

/// Pub/sub to datastore bridge.
pub struct Bridge {
    config: BridgeConfig,
    specs: Vec<ItemSpec>,
    running: Arc<AtomicBool>,
}

impl Bridge {
    /// Create a bridge from configuration.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let specs = config
            .items
            .iter()
            .map(ItemSpec::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            specs,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Validated items.
    pub fn items(&self) -> &[ItemSpec] {
        &self.specs
    }

    /// Check if bridge is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Subscribe all items and start processing.
    ///
    /// Fails without leaving subscriptions behind if any item cannot be
    /// wired.
    pub async fn run(
        &self,
        bus: Arc<dyn MessageBus>,
        sinks: Sinks,
    ) -> Result<BridgeHandle, BridgeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyRunning);
        }

        match self.start(bus, sinks) {
            Ok(handle) => {
                tracing::info!(
                    "Bridge '{}' started with {} item(s)",
                    self.config.name,
                    self.specs.len()
                );
                Ok(handle)
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn start(&self, bus: Arc<dyn MessageBus>, sinks: Sinks) -> Result<BridgeHandle, BridgeError> {
        let mut items = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let emitter = sinks.emitter_for(spec)?;
            items.push(IngestItem::new(spec.clone(), emitter));
        }

        let mut subscriptions = Vec::new();
        let mut wired = Vec::with_capacity(items.len());
        for item in items {
            let (tx, rx) = mpsc::channel(item.spec().queue_depth());
            match item.subscribe(bus.as_ref(), tx) {
                Ok(ids) => subscriptions.extend(ids),
                Err(e) => {
                    for id in subscriptions {
                        if let Err(err) = bus.unsubscribe(id) {
                            tracing::warn!("Failed to roll back subscription {}: {}", id, err);
                        }
                    }
                    return Err(BridgeError::Bus(e));
                }
            }
            wired.push((item, rx));
        }

        let stats: Vec<Arc<ItemStats>> = wired.iter().map(|(item, _)| item.stats()).collect();
        let tasks: Vec<_> = wired
            .into_iter()
            .map(|(item, rx)| tokio::spawn(item.run(rx)))
            .collect();

        let flusher = sinks.timeseries.as_ref().and_then(|sink| {
            let period = sink.flush_interval();
            let batch_ready = sink.batch_ready();
            if period.is_none() && batch_ready.is_none() {
                return None;
            }
            Some(spawn_flusher(
                Arc::clone(sink),
                period.unwrap_or(IDLE_FLUSH_PERIOD),
                batch_ready,
                Arc::clone(&self.running),
            ))
        });

        Ok(BridgeHandle {
            running: Arc::clone(&self.running),
            bus,
            subscriptions: Arc::new(Mutex::new(subscriptions)),
            stats: Arc::new(stats),
            tasks: Arc::new(Mutex::new(tasks)),
            flusher: Arc::new(Mutex::new(flusher)),
            timeseries: sinks.timeseries,
        })
    }
}

/// Writes time-series batches off the item tasks: on every tick and
/// whenever the sink reports a full batch.
fn spawn_flusher(
    sink: Arc<dyn TimeSeriesSink>,
    period: Duration,
    batch_ready: Option<Arc<Notify>>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(MIN_FLUSH_PERIOD));
        ticker.tick().await;
        while running.load(Ordering::Relaxed) {
            match &batch_ready {
                Some(ready) => {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = ready.notified() => {}
                    }
                }
                None => {
                    ticker.tick().await;
                }
            }
            if let Err(e) = sink.flush_if_due() {
                tracing::error!("Time-series flush failed: {}", e);
            }
        }
    })
}
