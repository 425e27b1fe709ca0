// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Mock sources and destinations that record what the agent does with them

use exporter_agent::{
    errors::{GatherError, WriteError},
    input::{Source, SourceKind},
    metric::MetricFamily,
    output::Destination,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Source returning the same families on every gather
pub struct StaticSource {
    families: Vec<MetricFamily>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn new(families: Vec<MetricFamily>) -> Self {
        StaticSource {
            families,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl Source for StaticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gatherer
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.families.clone())
    }
}

/// Everything a `RecordingDestination` saw, shared with the test body
#[derive(Clone, Default)]
pub struct Recording {
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub writes: Arc<Mutex<Vec<Vec<MetricFamily>>>>,
    /// Number of upcoming writes that fail
    pub failures: Arc<AtomicUsize>,
}

impl Recording {
    pub fn writes(&self) -> Vec<Vec<MetricFamily>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn written_families(&self) -> Vec<MetricFamily> {
        self.writes().into_iter().flatten().collect()
    }
}

/// Destination that records every call
pub struct RecordingDestination {
    recording: Recording,
}

impl RecordingDestination {
    pub fn new(recording: &Recording) -> Self {
        RecordingDestination {
            recording: recording.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Destination for RecordingDestination {
    async fn connect(&mut self) -> Result<(), WriteError> {
        self.recording.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&mut self, families: &[MetricFamily]) -> Result<(), WriteError> {
        let pending_failures = self.recording.failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.recording
                .failures
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(WriteError::Status {
                url: "http://127.0.0.1:9091/metrics/job/test".to_string(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.recording.writes.lock().unwrap().push(families.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        self.recording.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
