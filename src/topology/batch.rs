// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::DropPolicy;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Queue and batching behavior for one pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub channel_capacity: usize,
    pub batch_size: usize,
    #[serde(with = "crate::init::parse::humantime_duration")]
    pub flush_interval: Duration,
    pub drop_policy: DropPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drop_policy: DropPolicy::default(),
        }
    }
}

impl BackpressureConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if self.flush_interval.is_zero() {
            return Err("flush_interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Accumulates items until either the size limit is reached or the flush
/// deadline passes.
pub(crate) struct Batch<T> {
    items: Vec<T>,
    max_size: usize,
    last_flush: Instant,
    timeout: Duration,
}

impl<T> Batch<T> {
    pub(crate) fn new(max_size: usize, timeout: Duration) -> Batch<T> {
        Self {
            items: Vec::with_capacity(max_size),
            max_size,
            last_flush: Instant::now(),
            timeout,
        }
    }

    /// Instant at which the current batch is due, regardless of fill level.
    pub(crate) fn deadline(&self) -> Instant {
        self.last_flush + self.timeout
    }

    pub(crate) fn take_batch(&mut self) -> Vec<T> {
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size));
        self.last_flush = Instant::now();
        items
    }

    /// Adds an item, returning the full batch once it reaches the size limit.
    pub(crate) fn offer(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.max_size {
            return Some(self.take_batch());
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvests_at_size() {
        let mut batch = Batch::new(3, Duration::from_secs(1));
        assert_eq!(None, batch.offer(1));
        assert_eq!(None, batch.offer(2));
        assert_eq!(Some(vec![1, 2, 3]), batch.offer(3));
        assert!(batch.is_empty());

        assert_eq!(None, batch.offer(4));
        assert_eq!(1, batch.len());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_moves_on_take() {
        let mut batch = Batch::new(10, Duration::from_millis(200));
        let first = batch.deadline();
        batch.offer(1);
        assert_eq!(first, batch.deadline());

        tokio::time::advance(Duration::from_millis(201)).await;
        assert!(batch.deadline() <= Instant::now());
        assert_eq!(vec![1], batch.take_batch());
        assert!(batch.deadline() > Instant::now());
        assert!(batch.is_empty());
    }

    #[test]
    fn backpressure_validation() {
        assert!(BackpressureConfig::default().validate().is_ok());
        assert!(
            BackpressureConfig::default()
                .with_capacity(0)
                .validate()
                .is_err()
        );
        assert!(
            BackpressureConfig::default()
                .with_batch_size(0)
                .validate()
                .is_err()
        );
        assert!(
            BackpressureConfig::default()
                .with_flush_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn backpressure_defaults() {
        let bp = BackpressureConfig::default();
        assert_eq!(10_000, bp.channel_capacity);
        assert_eq!(256, bp.batch_size);
        assert_eq!(Duration::from_secs(5), bp.flush_interval);
        assert_eq!(DropPolicy::DropNewest, bp.drop_policy);
    }
}
