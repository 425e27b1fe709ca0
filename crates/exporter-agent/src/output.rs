// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{SerializeError, WriteError};
use crate::input::MIN_INTERVAL;
use crate::metric::MetricFamily;

/// Flush interval used when none is configured.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// The single place flushed batches are sent to.
///
/// `connect` is called once before the first flush, `write` once per drained
/// batch and `close` once on shutdown.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn connect(&mut self) -> Result<(), WriteError>;

    async fn write(&mut self, families: &[MetricFamily]) -> Result<(), WriteError>;

    async fn close(&mut self) -> Result<(), WriteError>;

    fn description(&self) -> &str {
        ""
    }
}

/// Encodes families into a wire payload.
pub trait Serializer: Send + Sync {
    fn serialize(&self, families: &[MetricFamily]) -> Result<Vec<u8>, SerializeError>;

    fn content_type(&self) -> &'static str;
}

/// The configured destination bound to its flush interval.
pub struct RunningOutput {
    name: String,
    flush_interval: Duration,
    destination: Box<dyn Destination>,
}

impl RunningOutput {
    /// Flush intervals shorter than one second are raised to one second.
    pub fn new(
        name: impl Into<String>,
        flush_interval: Duration,
        destination: Box<dyn Destination>,
    ) -> Self {
        RunningOutput {
            name: name.into(),
            flush_interval: flush_interval.max(MIN_INTERVAL),
            destination,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub async fn connect(&mut self) -> Result<(), WriteError> {
        self.destination.connect().await
    }

    pub async fn write(&mut self, families: &[MetricFamily]) -> Result<(), WriteError> {
        self.destination.write(families).await
    }

    pub async fn close(&mut self) -> Result<(), WriteError> {
        self.destination.close().await
    }
}
