// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size- and time-bounded batching buffer.

use std::time::{Duration, Instant};

/// Collects items until the batch is full or the flush interval elapsed.
#[derive(Debug)]
pub struct BatchBuffer<T> {
    items: Vec<T>,
    max_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl<T> BatchBuffer<T> {
    /// Create a buffer. A `max_size` of 0 is treated as 1.
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            items: Vec::with_capacity(max_size),
            max_size,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// Add an item, returning the full batch once `max_size` is reached.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.max_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// True if items are pending and the flush interval has elapsed.
    pub fn is_due(&self) -> bool {
        !self.items.is_empty() && self.last_flush.elapsed() >= self.flush_interval
    }

    /// Take all pending items and restart the interval.
    pub fn take(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}
