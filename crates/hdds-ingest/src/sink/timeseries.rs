// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffered Line Protocol sink.
//!
//! Points are encoded on write and batched. Writing a point never touches
//! the output: a full batch is queued and announced through
//! [`TimeSeriesSink::batch_ready`], and the flusher writes it on its next
//! [`TimeSeriesSink::flush_if_due`]. A partial batch goes out once the flush
//! interval elapses or on an explicit [`TimeSeriesSink::flush`].
//!
//! The sink does NOT perform HTTP requests to InfluxDB. Lines go to any
//! `Write` target (stdout, a file, a pipe to an uploader).

use super::buffer::BatchBuffer;
use super::line_protocol::Point;
use super::TimeSeriesSink;
use crate::config::TimeSeriesConfig;
use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Line Protocol sink writing to a byte stream.
pub struct LineProtocolSink {
    buffer: Mutex<BatchBuffer<String>>,
    /// Full batches waiting for the flusher.
    ready: Mutex<VecDeque<Vec<String>>>,
    batch_ready: Arc<Notify>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl LineProtocolSink {
    /// Create a sink over an arbitrary writer.
    pub fn with_writer(
        writer: Box<dyn Write + Send>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            buffer: Mutex::new(BatchBuffer::new(batch_size, flush_interval)),
            ready: Mutex::new(VecDeque::new()),
            batch_ready: Arc::new(Notify::new()),
            output: Mutex::new(writer),
        }
    }

    /// Create a sink from configuration (`-` writes to stdout).
    pub fn from_config(config: &TimeSeriesConfig) -> Result<Self> {
        let writer: Box<dyn Write + Send> = if config.output == "-" {
            Box::new(std::io::stdout())
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.output)
                .with_context(|| format!("Failed to open line protocol output {}", config.output))?;
            Box::new(file)
        };

        Ok(Self::with_writer(
            writer,
            config.batch_size,
            Duration::from_millis(config.flush_interval_ms),
        ))
    }

    /// Number of lines waiting for a flush, full batches included.
    pub fn pending(&self) -> usize {
        let buffered = self.buffer.lock().map(|b| b.len()).unwrap_or(0);
        let ready = self
            .ready
            .lock()
            .map(|r| r.iter().map(Vec::len).sum())
            .unwrap_or(0);
        buffered + ready
    }

    fn take_ready(&self) -> Result<Vec<String>> {
        let mut ready = self
            .ready
            .lock()
            .map_err(|_| anyhow!("ready batch lock poisoned"))?;
        Ok(ready.drain(..).flatten().collect())
    }

    fn write_lines(&self, lines: &[String]) -> Result<usize> {
        if lines.is_empty() {
            return Ok(0);
        }

        let mut output = self
            .output
            .lock()
            .map_err(|_| anyhow!("line output lock poisoned"))?;
        for line in lines {
            writeln!(output, "{}", line)?;
        }
        output.flush()?;

        tracing::debug!("Flushed {} line protocol points", lines.len());
        Ok(lines.len())
    }
}

impl TimeSeriesSink for LineProtocolSink {
    fn write_point(&self, point: Point) -> Result<()> {
        let line = point.to_line()?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("line buffer lock poisoned"))?;

        // Queued under the buffer lock so batches keep their order.
        if let Some(batch) = buffer.push(line) {
            self.ready
                .lock()
                .map_err(|_| anyhow!("ready batch lock poisoned"))?
                .push_back(batch);
            self.batch_ready.notify_one();
        }
        Ok(())
    }

    fn flush(&self) -> Result<usize> {
        let lines = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| anyhow!("line buffer lock poisoned"))?;
            let mut lines = self.take_ready()?;
            lines.extend(buffer.take());
            lines
        };
        self.write_lines(&lines)
    }

    fn flush_if_due(&self) -> Result<usize> {
        let lines = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| anyhow!("line buffer lock poisoned"))?;
            let mut lines = self.take_ready()?;
            if buffer.is_due() {
                lines.extend(buffer.take());
            }
            lines
        };
        self.write_lines(&lines)
    }

    fn flush_interval(&self) -> Option<Duration> {
        self.buffer.lock().ok().map(|b| b.flush_interval())
    }

    fn batch_ready(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.batch_ready))
    }
}

/// In-memory writer whose contents can be inspected while the sink owns it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
