// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! In-memory metric model shared by sources, the buffer and destinations.
//!
//! A [`MetricFamily`] groups every [`MetricSample`] published under one name.
//! Labels are plain owned values, so two samples never share a label set even
//! when they were built from the same tag map.

use std::fmt;
use std::str::FromStr;

/// Semantic type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetricType {
    #[default]
    Untyped,
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Untyped => "untyped",
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untyped" => Ok(MetricType::Untyped),
            "counter" => Ok(MetricType::Counter),
            "gauge" => Ok(MetricType::Gauge),
            "histogram" => Ok(MetricType::Histogram),
            "summary" => Ok(MetricType::Summary),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

/// A single `name=value` label pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// The observed value of a sample. Histogram and summary samples carry their
/// whole distribution.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Untyped(f64),
    Counter(f64),
    Gauge(f64),
    Histogram {
        sample_count: u64,
        sample_sum: f64,
        buckets: Vec<Bucket>,
    },
    Summary {
        sample_count: u64,
        sample_sum: f64,
        quantiles: Vec<Quantile>,
    },
}

impl SampleValue {
    #[must_use]
    pub fn metric_type(&self) -> MetricType {
        match self {
            SampleValue::Untyped(_) => MetricType::Untyped,
            SampleValue::Counter(_) => MetricType::Counter,
            SampleValue::Gauge(_) => MetricType::Gauge,
            SampleValue::Histogram { .. } => MetricType::Histogram,
            SampleValue::Summary { .. } => MetricType::Summary,
        }
    }

    /// Returns the scalar value for untyped, counter and gauge samples.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Untyped(v) | SampleValue::Counter(v) | SampleValue::Gauge(v) => Some(*v),
            SampleValue::Histogram { .. } | SampleValue::Summary { .. } => None,
        }
    }
}

/// One observation within a family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub labels: Vec<Label>,
    pub value: SampleValue,
    /// Milliseconds since the epoch. `None` means "now" for the destination.
    pub timestamp_ms: Option<i64>,
}

impl MetricSample {
    #[must_use]
    pub fn new(value: SampleValue) -> Self {
        MetricSample {
            labels: Vec::new(),
            value,
            timestamp_ms: None,
        }
    }

    #[must_use]
    pub fn untyped(value: f64) -> Self {
        Self::new(SampleValue::Untyped(value))
    }

    #[must_use]
    pub fn gauge(value: f64) -> Self {
        Self::new(SampleValue::Gauge(value))
    }

    #[must_use]
    pub fn counter(value: f64) -> Self {
        Self::new(SampleValue::Counter(value))
    }

    #[must_use]
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_label(Label::new(name, value));
        self
    }

    #[must_use]
    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Adds a label, keeping label names unique. An existing label with the
    /// same name has its value replaced in place.
    pub fn add_label(&mut self, label: Label) {
        match self.labels.iter_mut().find(|l| l.name == label.name) {
            Some(existing) => existing.value = label.value,
            None => self.labels.push(label),
        }
    }

    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }
}

/// A named group of samples sharing one type.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub metric_type: MetricType,
    pub samples: Vec<MetricSample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        MetricFamily {
            name: name.into(),
            help: None,
            metric_type,
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    #[must_use]
    pub fn with_sample(mut self, sample: MetricSample) -> Self {
        self.samples.push(sample);
        self
    }

    pub fn push_sample(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    /// Moves every sample of `other` to the end of this family. The name,
    /// type and help of `self` are kept.
    pub fn append(&mut self, other: MetricFamily) {
        self.samples.extend(other.samples);
    }

    /// Adds `labels` to every sample of the family.
    pub fn add_labels(&mut self, labels: &[Label]) {
        for sample in &mut self.samples {
            for label in labels {
                sample.add_label(label.clone());
            }
        }
    }
}
