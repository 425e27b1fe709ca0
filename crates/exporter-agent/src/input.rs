// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Source contract and the per-input polling scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::errors::GatherError;
use crate::metric::{Label, MetricFamily};

/// Shortest polling interval accepted for an input.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Polling interval used when an input does not configure one.
pub const DEFAULT_INPUT_INTERVAL: Duration = Duration::from_secs(10);

/// Capability tag declared by every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Produces families and publishes adapter-scoped tags through [`Source::tags`].
    Collector,
    /// Only produces families.
    Gatherer,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Collector => f.write_str("collector"),
            SourceKind::Gatherer => f.write_str("gatherer"),
        }
    }
}

#[async_trait]
pub trait Source: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError>;

    /// Labels applied to every sample of a collector before it is enqueued.
    /// Ignored for gatherers.
    fn tags(&self) -> Vec<Label> {
        Vec::new()
    }

    fn description(&self) -> &str {
        ""
    }

    /// Called once when the agent stops, so the adapter can release whatever
    /// it registered or opened.
    async fn shutdown(&self) {}
}

/// One configured source bound to its interval, its static tags and its stop signal.
pub struct RunningInput {
    name: String,
    interval: Duration,
    tags: Vec<Label>,
    source: Arc<dyn Source>,
    stop: CancellationToken,
}

impl RunningInput {
    /// Creates the running input. Intervals shorter than [`MIN_INTERVAL`] are
    /// raised to it.
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        tags: Vec<Label>,
        source: Box<dyn Source>,
    ) -> Self {
        RunningInput {
            name: name.into(),
            interval: interval.max(MIN_INTERVAL),
            tags,
            source: Arc::from(source),
            stop: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Gathers once and applies the adapter tags (collectors only) and the
    /// configured input tags to every sample.
    pub async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        gather_tagged(self.source.as_ref(), &self.tags).await
    }

    /// Starts the polling loop. `initial` holds the families of the
    /// synchronous startup gather and is enqueued before the first tick.
    pub(crate) fn spawn(
        &self,
        tx: mpsc::Sender<Vec<MetricFamily>>,
        initial: Vec<MetricFamily>,
    ) -> JoinHandle<()> {
        let scheduler = Scheduler {
            source: Arc::clone(&self.source),
            tags: self.tags.clone(),
            interval: self.interval,
            tx,
            stop: self.stop.clone(),
        };
        let span = info_span!("input", input = %self.name);
        tokio::spawn(scheduler.run(initial).instrument(span))
    }

    /// Signals the polling loop to exit and lets the adapter release its resources.
    pub async fn stop(&self) {
        self.stop.cancel();
        self.source.shutdown().await;
    }
}

async fn gather_tagged(
    source: &dyn Source,
    tags: &[Label],
) -> Result<Vec<MetricFamily>, GatherError> {
    let mut families = source.gather().await?;
    let adapter_tags = match source.kind() {
        SourceKind::Collector => source.tags(),
        SourceKind::Gatherer => Vec::new(),
    };
    if !adapter_tags.is_empty() || !tags.is_empty() {
        for family in &mut families {
            family.add_labels(&adapter_tags);
            family.add_labels(tags);
        }
    }
    Ok(families)
}

struct Scheduler {
    source: Arc<dyn Source>,
    tags: Vec<Label>,
    interval: Duration,
    tx: mpsc::Sender<Vec<MetricFamily>>,
    stop: CancellationToken,
}

impl Scheduler {
    async fn run(self, initial: Vec<MetricFamily>) {
        debug!(interval = ?self.interval, "Input scheduler started");
        if !initial.is_empty() && !self.enqueue(initial).await {
            return;
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => {
                    debug!("Input scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    debug!("start_gather");
                    match gather_tagged(self.source.as_ref(), &self.tags).await {
                        Ok(families) => {
                            debug!(length = families.len(), "input_gather_metrics");
                            if !self.enqueue(families).await {
                                return;
                            }
                        }
                        Err(e) => error!(error = %e, "gather_failed"),
                    }
                }
            }
        }
    }

    /// Sends one gather result to the fan-in channel. Returns false when the
    /// scheduler must exit. A send still blocked after one interval is
    /// reported once and kept waiting.
    async fn enqueue(&self, families: Vec<MetricFamily>) -> bool {
        let send = self.tx.send(families);
        tokio::pin!(send);
        let slow = sleep(self.interval);
        tokio::pin!(slow);
        let mut reported = false;

        let sent = loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => {
                    debug!("Input scheduler stopped while enqueueing");
                    return false;
                }
                sent = &mut send => break sent,
                () = &mut slow, if !reported => {
                    reported = true;
                    warn!(interval = ?self.interval, "failed to enqueue within interval");
                }
            }
        };

        if sent.is_err() {
            debug!("Fan-in channel closed, stopping input scheduler");
            return false;
        }
        true
    }
}
