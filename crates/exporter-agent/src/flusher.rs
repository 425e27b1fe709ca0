// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::BoundedBuffer;
use crate::metric::{Label, MetricFamily};
use crate::output::RunningOutput;

/// Largest number of families popped from the buffer per write when none is configured.
pub const DEFAULT_METRIC_BATCH_SIZE: usize = 10_000;

pub struct FlusherConfig {
    pub buffer: Arc<BoundedBuffer>,
    pub batch_size: usize,
    pub global_tags: Vec<Label>,
    /// Count every drain step as a full batch, whatever was actually popped.
    pub legacy_batch_decrement: bool,
}

/// What one flush tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub writes: usize,
    pub families_written: usize,
    pub failed: bool,
}

pub struct Flusher {
    output: RunningOutput,
    buffer: Arc<BoundedBuffer>,
    batch_size: usize,
    global_tags: Vec<Label>,
    legacy_batch_decrement: bool,
}

impl Flusher {
    pub fn new(output: RunningOutput, config: FlusherConfig) -> Self {
        Flusher {
            output,
            buffer: config.buffer,
            batch_size: config.batch_size.max(1),
            global_tags: config.global_tags,
            legacy_batch_decrement: config.legacy_batch_decrement,
        }
    }

    /// Flushes on every interval until `stop` fires, then closes the destination.
    /// Whatever is still buffered at that point is dropped.
    pub async fn run(mut self, stop: CancellationToken) {
        let period = self.output.flush_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(flush_interval = ?period, "Flusher started");

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    if let Err(e) = self.output.close().await {
                        error!(error = %e, "close_output_failed");
                    }
                    debug!("Flusher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }

    /// Drains the buffer in batches of at most `batch_size`, stopping at the
    /// first failed pop or write. Anything not yet popped stays buffered for
    /// the next tick.
    pub async fn flush_once(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        let mut remaining = match self.buffer.try_len() {
            Ok(len) => len,
            Err(e) => {
                error!(error = %e, "pop_many failed");
                report.failed = true;
                return report;
            }
        };

        while remaining > 0 {
            let batch = self.batch_size.min(remaining);
            debug!(buffer_length = remaining, batch_size = batch, "write_output_size");

            let items = match self.buffer.pop_many(batch) {
                Ok(items) => items,
                Err(e) => {
                    error!(error = %e, buffer_length = remaining, "pop_many failed");
                    report.failed = true;
                    break;
                }
            };
            let popped = items.len();
            if popped == 0 && !self.legacy_batch_decrement {
                break;
            }
            remaining = if self.legacy_batch_decrement {
                remaining.saturating_sub(self.batch_size)
            } else {
                remaining.saturating_sub(popped)
            };

            let mut families = merge_by_name(items);
            if families.is_empty() {
                warn!(
                    buffer_length = remaining,
                    "write_output_failed: at least one metric is required"
                );
                continue;
            }
            inject_tags(&mut families, &self.global_tags);

            if let Err(e) = self.output.write(&families).await {
                error!(
                    error = %e,
                    buffer_length = self.buffer.len(),
                    "write_output_failed"
                );
                report.failed = true;
                break;
            }
            report.writes += 1;
            report.families_written += families.len();
        }

        if report.writes > 0 {
            debug!(
                writes = report.writes,
                families = report.families_written,
                "Flushed metric families"
            );
        }
        report
    }
}

/// Folds families sharing a name into one, keeping the order in which names
/// were first seen. Families without a name are skipped.
#[must_use]
pub fn merge_by_name(items: Vec<MetricFamily>) -> Vec<MetricFamily> {
    let mut merged: Vec<MetricFamily> = Vec::with_capacity(items.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(items.len());

    for family in items {
        if family.name.is_empty() {
            debug!("Skipping metric family without a name");
            continue;
        }
        match index.get(&family.name) {
            Some(&i) => merged[i].append(family),
            None => {
                index.insert(family.name.clone(), merged.len());
                merged.push(family);
            }
        }
    }
    merged
}

/// Adds every global tag to every sample. Must run once per flush, after the merge.
pub fn inject_tags(families: &mut [MetricFamily], tags: &[Label]) {
    if tags.is_empty() {
        return;
    }
    for family in families {
        family.add_labels(tags);
    }
}
