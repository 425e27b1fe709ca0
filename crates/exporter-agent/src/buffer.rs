// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO buffer sitting between the fan-in collector and the flusher.
//!
//! # Capacity
//!
//! The buffer never grows past its configured capacity. A push against a full
//! buffer is rejected and the item is handed back to the caller, which is
//! expected to log and drop it. Overflow is frequent under load, so it is a
//! plain return value rather than an error.
//!
//! # Concurrency
//!
//! All operations take the same lock, so `push`, `len` and `pop_many` are
//! atomic with respect to each other. Producers never block on a full buffer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tracing::error;

use crate::metric::MetricFamily;

/// Maximum number of families held by the buffer when none is configured.
pub const DEFAULT_METRIC_BUFFER_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("metric buffer lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
pub struct BoundedBuffer {
    queue: Mutex<VecDeque<MetricFamily>>,
    capacity: usize,
}

impl Default for BoundedBuffer {
    fn default() -> Self {
        BoundedBuffer::new(DEFAULT_METRIC_BUFFER_LIMIT)
    }
}

impl BoundedBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        BoundedBuffer {
            queue: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<MetricFamily>>, BufferError> {
        self.queue.lock().map_err(|_| {
            error!("Metric buffer lock poisoned");
            BufferError::Poisoned
        })
    }

    /// Appends `item` if there is room, otherwise returns it untouched.
    pub fn push(&self, item: MetricFamily) -> Result<(), MetricFamily> {
        let Ok(mut queue) = self.lock() else {
            return Err(item);
        };
        if queue.len() >= self.capacity {
            return Err(item);
        }
        queue.push_back(item);
        Ok(())
    }

    /// Current occupancy, or the lock failure that `pop_many` would hit.
    pub fn try_len(&self) -> Result<usize, BufferError> {
        self.lock().map(|queue| queue.len())
    }

    /// Current occupancy for diagnostics; a poisoned buffer reads as empty.
    #[must_use]
    pub fn len(&self) -> usize {
        self.try_len().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns up to `n` items in push order.
    ///
    /// A failure leaves the buffer untouched; callers retry on their next tick.
    pub fn pop_many(&self, n: usize) -> Result<Vec<MetricFamily>, BufferError> {
        let mut queue = self.lock()?;
        let count = n.min(queue.len());
        Ok(queue.drain(..count).collect())
    }

    #[cfg(test)]
    pub(crate) fn poison(self: &std::sync::Arc<Self>) {
        let buffer = std::sync::Arc::clone(self);
        let _ = std::thread::spawn(move || {
            let _guard = buffer.queue.lock();
            panic!("poisoning the metric buffer");
        })
        .join();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metric::{MetricSample, MetricType};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn family(name: &str) -> MetricFamily {
        MetricFamily::new(name, MetricType::Gauge).with_sample(MetricSample::gauge(1.0))
    }

    fn names(items: &[MetricFamily]) -> Vec<&str> {
        items.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn poisoned_lock_is_an_error_not_an_empty_buffer() {
        let buffer = Arc::new(BoundedBuffer::new(10));
        buffer.push(family("a")).unwrap();
        buffer.poison();

        assert_eq!(buffer.try_len(), Err(BufferError::Poisoned));
        assert_eq!(buffer.pop_many(1).unwrap_err(), BufferError::Poisoned);
        assert!(buffer.push(family("b")).is_err());
    }

    #[test]
    fn pop_many_returns_items_in_push_order() {
        let buffer = BoundedBuffer::new(10);
        for name in ["a", "b", "c", "d"] {
            buffer.push(family(name)).unwrap();
        }

        assert_eq!(names(&buffer.pop_many(2).unwrap()), vec!["a", "b"]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(names(&buffer.pop_many(10).unwrap()), vec!["c", "d"]);
        assert!(buffer.is_empty());
        assert!(buffer.pop_many(3).unwrap().is_empty());
    }

    #[test]
    fn push_on_full_buffer_is_rejected() {
        let buffer = BoundedBuffer::new(2);
        buffer.push(family("first")).unwrap();
        buffer.push(family("second")).unwrap();

        let rejected = buffer.push(family("third")).unwrap_err();
        assert_eq!(rejected.name, "third");
        assert_eq!(buffer.len(), 2);

        let drained = buffer.pop_many(10).unwrap();
        assert_eq!(names(&drained), vec!["first", "second"]);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let buffer = BoundedBuffer::new(0);
        assert!(buffer.push(family("a")).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn concurrent_pushes_never_exceed_capacity() {
        let buffer = Arc::new(BoundedBuffer::new(100));
        let handles: Vec<_> = (0..8)
            .map(|writer| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..50 {
                        let _ = buffer.push(family(&format!("w{writer}_{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn pushes_from_one_writer_stay_ordered() {
        let buffer = Arc::new(BoundedBuffer::new(1_000));
        let writers: Vec<_> = ["x", "y"]
            .into_iter()
            .map(|prefix| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..200 {
                        buffer.push(family(&format!("{prefix}{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let drained = buffer.pop_many(1_000).unwrap();
        for prefix in ["x", "y"] {
            let seen: Vec<usize> = drained
                .iter()
                .filter_map(|f| f.name.strip_prefix(prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..200).collect::<Vec<_>>());
        }
    }

    proptest! {
        #[test]
        fn prop_len_and_fifo(pushes in 0usize..64, take in 0usize..64) {
            let buffer = BoundedBuffer::new(64);
            for i in 0..pushes {
                buffer.push(family(&i.to_string())).unwrap();
            }
            prop_assert_eq!(buffer.len(), pushes);

            let k = take.min(pushes);
            let popped = buffer.pop_many(k).unwrap();
            let expected: Vec<String> = (0..k).map(|i| i.to_string()).collect();
            let got: Vec<String> = popped.into_iter().map(|f| f.name).collect();
            prop_assert_eq!(got, expected);
            prop_assert_eq!(buffer.len(), pushes - k);
        }

        #[test]
        fn prop_rejected_items_never_come_back(capacity in 1usize..16, extra in 1usize..16) {
            let buffer = BoundedBuffer::new(capacity);
            for i in 0..capacity {
                buffer.push(family(&format!("kept{i}"))).unwrap();
            }
            for i in 0..extra {
                let name = format!("dropped{i}");
                prop_assert!(buffer.push(family(&name)).is_err());
                prop_assert_eq!(buffer.len(), capacity);
            }
            let drained = buffer.pop_many(capacity + extra).unwrap();
            prop_assert!(drained.iter().all(|f| f.name.starts_with("kept")));
        }
    }
}
