// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use exporter_agent::errors::GatherError;
use exporter_agent::metric::{Label, MetricFamily, MetricSample, MetricType};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{push_family, NameFilter, Parser};

/// Parses the `/api/stats` output of OpenTSDB:
/// `[{"metric": "tsd.rpc.received", "timestamp": 1700000000, "value": "42", "tags": {...}}]`.
#[derive(Debug)]
pub struct OpenTsdbParser {
    filter: NameFilter,
    ignore_timestamp: bool,
}

#[derive(Deserialize)]
struct Point {
    metric: String,
    #[serde(default)]
    timestamp: i64,
    value: Value,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl OpenTsdbParser {
    #[must_use]
    pub fn new(filter: NameFilter, ignore_timestamp: bool) -> Self {
        OpenTsdbParser {
            filter,
            ignore_timestamp,
        }
    }
}

impl Parser for OpenTsdbParser {
    fn parse(
        &self,
        body: &[u8],
        tags: &[Label],
        _content_type: Option<&str>,
    ) -> Result<Vec<MetricFamily>, GatherError> {
        let points: Vec<Point> = serde_json::from_slice(body)
            .map_err(|e| GatherError::Parse(format!("invalid opentsdb payload: {e}")))?;

        let mut families = Vec::new();
        for point in points {
            let name = point.metric.replace(['.', '-'], "_");
            if !self.filter.allows(&name) {
                continue;
            }
            let value = match &point.value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            let Some(value) = value else {
                warn!(metric = %name, value = %point.value, "value is not numeric");
                continue;
            };

            let mut sample = MetricSample::untyped(value);
            if !self.ignore_timestamp {
                sample.timestamp_ms = Some(normalize_timestamp_ms(point.timestamp));
            }
            for (key, value) in point.tags {
                sample.add_label(Label::new(key, value));
            }
            for tag in tags {
                sample.add_label(tag.clone());
            }
            push_family(
                &mut families,
                MetricFamily::new(name, MetricType::Untyped).with_sample(sample),
            );
        }
        Ok(families)
    }
}

/// Seconds, milliseconds and microseconds are told apart by their digit
/// count. Anything else is replaced by the current time.
fn normalize_timestamp_ms(timestamp: i64) -> i64 {
    match timestamp.unsigned_abs().to_string().len() {
        10 => timestamp.saturating_mul(1000),
        13 => timestamp,
        16 => timestamp / 1000,
        _ => now_ms(),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
