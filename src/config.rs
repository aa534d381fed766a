// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::CompressionType;
use std::time::Duration;

/// Task configuration builder
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of mapping workers (also the flush pool size)
    pub worker_pool_size: usize,

    /// Total in-memory budget of all cluster buffers in bytes
    ///
    /// The embedder typically derives this from a fraction of
    /// host memory.
    pub memory_buffer_size: u64,

    /// Byte threshold at which an open segment writer is
    /// considered full
    pub writer_flush_size: u64,

    /// Fraction of the memory budget below which the scheduler
    /// stops draining buffers
    pub low_watermark: f64,

    /// Fraction of the memory budget above which workers ask the
    /// scheduler to drain the largest buffers
    pub high_watermark: f64,

    /// How long a blocked worker sleeps between memory re-checks
    pub backpressure_interval: Duration,

    /// Capacity of the flush signal channel
    pub signal_capacity: usize,

    /// Row cadence of the memory checks inside the mapping workers
    pub flush_check_interval: u64,

    /// Object store prefix for output binlogs and statslogs
    pub binlog_root: String,

    /// Object store prefix for partition stats snapshots
    /// (scalar mode; vector mode derives it from the analyze root)
    pub stats_root: String,

    /// What type of compression is used for uploaded blobs
    pub compression: CompressionType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            memory_buffer_size: /* 512 MiB */ 512 * 1_024 * 1_024,
            writer_flush_size: /* 16 MiB */ 16 * 1_024 * 1_024,
            low_watermark: 0.3,
            high_watermark: 0.9,
            backpressure_interval: Duration::from_millis(200),
            signal_capacity: 100,
            flush_check_interval: 100,
            binlog_root: "files".into(),
            stats_root: "stats".into(),
            compression: CompressionType::None,
        }
    }
}

impl Config {
    /// Initializes a new config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of mapping workers.
    ///
    /// The flush pool is sized identically.
    ///
    /// Defaults to 4; values below 1 are clamped to 1.
    #[must_use]
    pub fn worker_pool_size(mut self, n: usize) -> Self {
        self.worker_pool_size = n.max(1);
        self
    }

    /// Sets the total memory budget of all cluster buffers.
    ///
    /// Defaults to 512 MiB.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 0.
    #[must_use]
    pub fn memory_buffer_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "memory budget may not be zero");

        self.memory_buffer_size = bytes;
        self
    }

    /// Sets the byte threshold at which an open writer is full.
    ///
    /// Defaults to 16 MiB.
    #[must_use]
    pub fn writer_flush_size(mut self, bytes: u64) -> Self {
        self.writer_flush_size = bytes;
        self
    }

    /// Sets the compression method for uploaded blobs.
    ///
    /// Default = None
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the object store prefix for output binlogs.
    ///
    /// Defaults to `files`.
    #[must_use]
    pub fn binlog_root(mut self, root: &str) -> Self {
        self.binlog_root = root.into();
        self
    }

    /// Sets the object store prefix for partition stats snapshots.
    ///
    /// Defaults to `stats`.
    #[must_use]
    pub fn stats_root(mut self, root: &str) -> Self {
        self.stats_root = root.into();
        self
    }

    /// Sets the low and high memory watermarks.
    ///
    /// Draining stops below `low` x budget; draining is requested
    /// above `high` x budget. The hard block threshold is always
    /// 1.0 x budget.
    ///
    /// Defaults to 0.3 / 0.9.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= low <= high <= 1.0`.
    #[must_use]
    pub fn watermarks(mut self, low: f64, high: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high) && low <= high,
            "invalid watermark fractions",
        );

        self.low_watermark = low;
        self.high_watermark = high;
        self
    }

    /// Sets the backpressure poll interval.
    ///
    /// Defaults to 200 ms.
    #[must_use]
    pub fn backpressure_interval(mut self, interval: Duration) -> Self {
        self.backpressure_interval = interval;
        self
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn low_threshold(&self) -> u64 {
        (self.memory_buffer_size as f64 * self.low_watermark) as u64
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn high_threshold(&self) -> u64 {
        (self.memory_buffer_size as f64 * self.high_watermark) as u64
    }

    pub(crate) fn block_threshold(&self) -> u64 {
        self.memory_buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn config_watermark_thresholds() {
        let config = Config::new().memory_buffer_size(1_000).watermarks(0.3, 0.9);

        assert_eq!(300, config.low_threshold());
        assert_eq!(900, config.high_threshold());
        assert_eq!(1_000, config.block_threshold());
    }

    #[test]
    fn config_clamps_pool_size() {
        assert_eq!(1, Config::new().worker_pool_size(0).worker_pool_size);
    }
}
