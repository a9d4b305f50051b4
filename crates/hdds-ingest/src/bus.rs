// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message bus abstraction.
//!
//! The ingestion engine only needs to register one handler channel per
//! concrete subscription pattern and release it again. Connection,
//! session and delivery guarantees belong to the bus implementation.
//!
//! [`InMemoryBus`] is an in-process broker used by the CLI (fed from
//! stdin) and by tests.

use crate::topic::{self, MULTI_LEVEL_WILDCARD};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid subscription pattern '{0}'")]
    InvalidPattern(String),

    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("bus closed")]
    Closed,
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Fully qualified topic the message was published on.
    pub topic: String,
    /// Raw message body.
    pub body: String,
}

impl Message {
    /// Create a new message.
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }

    /// Topic levels.
    pub fn segments(&self) -> Vec<&str> {
        topic::segments(&self.topic)
    }
}

/// Bus delivery QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(other),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Handle for a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message bus used by ingestion items.
pub trait MessageBus: Send + Sync {
    /// Register `sender` for every message matching `pattern`.
    fn subscribe(
        &self,
        pattern: &str,
        qos: QoS,
        sender: mpsc::Sender<Message>,
    ) -> Result<SubscriptionId, BusError>;

    /// Stop future delivery for a subscription.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}

/// Check that `#` only appears as the whole last level.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    if pattern.is_empty() {
        return Err(BusError::InvalidPattern(pattern.to_string()));
    }

    let levels = topic::segments(pattern);
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains(MULTI_LEVEL_WILDCARD) && (i != last || *level != MULTI_LEVEL_WILDCARD) {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
    }
    Ok(())
}

struct BusSubscription {
    id: SubscriptionId,
    pattern: String,
    qos: QoS,
    sender: mpsc::Sender<Message>,
}

/// In-process broker.
///
/// Every matching subscription receives its own copy of a published
/// message, so overlapping patterns registered by one item deliver twice.
pub struct InMemoryBus {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<BusSubscription>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Publish a message, returning the number of subscriptions it was
    /// delivered to.
    ///
    /// Delivery never blocks: a subscriber whose queue is full drops the
    /// message, a closed subscriber is skipped.
    pub fn publish(&self, topic: &str, body: &str) -> Result<usize, BusError> {
        let subscriptions = self.subscriptions.lock().map_err(|_| BusError::Closed)?;
        let mut delivered = 0;

        for sub in subscriptions.iter() {
            if !topic::topic_matches(&sub.pattern, topic) {
                continue;
            }
            match sub.sender.try_send(Message::new(topic, body)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Subscription {} ({}) queue full, dropping message on {}",
                        sub.id,
                        sub.pattern,
                        topic
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Subscription {} closed", sub.id);
                }
            }
        }

        Ok(delivered)
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Patterns currently subscribed, in registration order.
    pub fn patterns(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|s| s.iter().map(|sub| sub.pattern.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBus {
    fn subscribe(
        &self,
        pattern: &str,
        qos: QoS,
        sender: mpsc::Sender<Message>,
    ) -> Result<SubscriptionId, BusError> {
        validate_pattern(pattern)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscriptions = self.subscriptions.lock().map_err(|_| BusError::Closed)?;
        subscriptions.push(BusSubscription {
            id,
            pattern: pattern.to_string(),
            qos,
            sender,
        });

        tracing::debug!("Subscribed {} to {} (qos {})", id, pattern, u8::from(qos));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut subscriptions = self.subscriptions.lock().map_err(|_| BusError::Closed)?;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);

        if subscriptions.len() == before {
            return Err(BusError::UnknownSubscription(id));
        }
        tracing::debug!("Unsubscribed {}", id);
        Ok(())
    }
}

impl fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary: Vec<(SubscriptionId, String, QoS)> = self
            .subscriptions
            .lock()
            .map(|s| s.iter().map(|sub| (sub.id, sub.pattern.clone(), sub.qos)).collect())
            .unwrap_or_default();
        f.debug_struct("InMemoryBus")
            .field("subscriptions", &summary)
            .finish()
    }
}

/// Bus whose subscriptions fail after `accept` successes and whose
/// unsubscribe always fails.
#[cfg(test)]
pub(crate) struct BrokenBus {
    accept: usize,
    subscribed: Mutex<Vec<SubscriptionId>>,
    pub(crate) unsubscribe_attempts: Mutex<Vec<SubscriptionId>>,
}

#[cfg(test)]
impl BrokenBus {
    pub(crate) fn new(accept: usize) -> Self {
        Self {
            accept,
            subscribed: Mutex::new(Vec::new()),
            unsubscribe_attempts: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl MessageBus for BrokenBus {
    fn subscribe(
        &self,
        pattern: &str,
        _qos: QoS,
        _sender: mpsc::Sender<Message>,
    ) -> Result<SubscriptionId, BusError> {
        let mut subscribed = self.subscribed.lock().unwrap();
        if subscribed.len() >= self.accept {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        let id = SubscriptionId(subscribed.len() as u64 + 1);
        subscribed.push(id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.unsubscribe_attempts.lock().unwrap().push(id);
        Err(BusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_segments() {
        let msg = Message::new("A/B/C", "123");
        assert_eq!(msg.segments(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(QoS::try_from(0u8), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(2u8), Ok(QoS::ExactlyOnce));
        assert_eq!(QoS::try_from(3u8), Err(3));
        assert_eq!(u8::from(QoS::AtLeastOnce), 1);
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("a/+/c").is_ok());
        assert!(validate_pattern("a/#").is_ok());
        assert!(validate_pattern("#").is_ok());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("a/#/c").is_err());
        assert!(validate_pattern("a/b#").is_err());
    }

    #[tokio::test]
    async fn test_publish_routes_to_matching_subscriptions() {
        let bus = InMemoryBus::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        bus.subscribe("sensors/+/temp", QoS::AtMostOnce, tx_a)
            .expect("subscribe a");
        bus.subscribe("other/#", QoS::AtLeastOnce, tx_b)
            .expect("subscribe b");

        let delivered = bus.publish("sensors/s1/temp", "21.5").expect("publish");
        assert_eq!(delivered, 1);

        let msg = rx_a.recv().await.expect("message");
        assert_eq!(msg.topic, "sensors/s1/temp");
        assert_eq!(msg.body, "21.5");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::channel(8);

        let id = bus.subscribe("a/b", QoS::AtMostOnce, tx).expect("subscribe");
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(id).expect("unsubscribe");
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.publish("a/b", "x").expect("publish"), 0);

        // Sender dropped with the subscription, so the channel is closed.
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            bus.unsubscribe(id),
            Err(BusError::UnknownSubscription(_))
        ));
    }

    #[test]
    fn test_publish_drops_when_queue_full() {
        let bus = InMemoryBus::new();
        let (tx, _rx) = mpsc::channel(1);
        bus.subscribe("a", QoS::AtMostOnce, tx).expect("subscribe");

        assert_eq!(bus.publish("a", "1").expect("publish"), 1);
        assert_eq!(bus.publish("a", "2").expect("publish"), 0);
    }

    #[test]
    fn test_subscribe_rejects_invalid_pattern() {
        let bus = InMemoryBus::new();
        let (tx, _rx) = mpsc::channel(1);
        assert!(bus.subscribe("a/#/b", QoS::AtMostOnce, tx).is_err());
    }
}
