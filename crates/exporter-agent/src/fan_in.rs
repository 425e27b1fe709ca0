// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Single consumer of the fan-in channel. Moves every received family into
//! the bounded buffer and drops whatever does not fit.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::BoundedBuffer;
use crate::metric::MetricFamily;

pub struct FanInCollector {
    rx: mpsc::Receiver<Vec<MetricFamily>>,
    buffer: Arc<BoundedBuffer>,
    limit: usize,
}

impl FanInCollector {
    #[must_use]
    pub fn new(
        rx: mpsc::Receiver<Vec<MetricFamily>>,
        buffer: Arc<BoundedBuffer>,
        limit: usize,
    ) -> Self {
        FanInCollector { rx, buffer, limit }
    }

    pub async fn run(mut self, stop: CancellationToken) {
        debug!("Fan-in collector started");
        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    debug!("Fan-in collector stopped");
                    return;
                }
                batch = self.rx.recv() => match batch {
                    Some(batch) => {
                        self.accept(batch);
                    }
                    None => {
                        debug!("Fan-in channel closed, fan-in collector exiting");
                        return;
                    }
                },
            }
        }
    }

    /// Pushes every family of `batch` that fits under the limit. Returns the
    /// number of families accepted.
    pub fn accept(&self, batch: Vec<MetricFamily>) -> usize {
        debug!(families = batch.len(), "read_buffer_from_metric_chan");
        let mut accepted = 0;
        for family in batch {
            let len = self.buffer.len();
            if len >= self.limit {
                warn!(len, limit = self.limit, family = %family.name, "out of buffer limit");
                continue;
            }
            match self.buffer.push(family) {
                Ok(()) => accepted += 1,
                Err(rejected) => {
                    warn!(len, limit = self.limit, family = %rejected.name, "out of buffer limit");
                }
            }
        }
        accepted
    }
}
