// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Prometheus protobuf exposition: a stream of length-delimited
//! `io.prometheus.client.MetricFamily` messages.

use ::prometheus::proto;
use ::protobuf::{CodedInputStream, ProtobufError};
use exporter_agent::errors::GatherError;
use exporter_agent::metric::{
    Bucket, Label, MetricFamily, MetricSample, MetricType, Quantile, SampleValue,
};

use super::push_family;

const MEDIA_TYPE: &str = "application/vnd.google.protobuf";
const PROTO: &str = "io.prometheus.client.MetricFamily";

/// Matches the delimited protobuf media type, parameters in any order.
#[must_use]
pub fn is_delimited(content_type: &str) -> bool {
    let mut parts = content_type.split(';').map(str::trim);
    if !parts
        .next()
        .is_some_and(|media| media.eq_ignore_ascii_case(MEDIA_TYPE))
    {
        return false;
    }

    let mut proto_matches = false;
    let mut delimited = false;
    for param in parts {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "proto" => proto_matches = value == PROTO,
            "encoding" => delimited = value == "delimited",
            _ => {}
        }
    }
    proto_matches && delimited
}

/// Decodes every message of `body`. Same-named families are merged in
/// first-seen order and families without samples are dropped.
pub fn parse_delimited(body: &[u8]) -> Result<Vec<MetricFamily>, GatherError> {
    let mut input = CodedInputStream::from_bytes(body);
    let mut families = Vec::new();
    while !input.eof().map_err(decode_error)? {
        let family: proto::MetricFamily = input.read_message().map_err(decode_error)?;
        if family.get_name().is_empty() || family.get_metric().is_empty() {
            continue;
        }
        push_family(&mut families, convert(&family));
    }
    Ok(families)
}

fn decode_error(e: ProtobufError) -> GatherError {
    GatherError::Parse(format!("reading metric family protocol buffer failed: {e}"))
}

fn convert(family: &proto::MetricFamily) -> MetricFamily {
    let metric_type = match family.get_field_type() {
        proto::MetricType::COUNTER => MetricType::Counter,
        proto::MetricType::GAUGE => MetricType::Gauge,
        proto::MetricType::SUMMARY => MetricType::Summary,
        proto::MetricType::HISTOGRAM => MetricType::Histogram,
        _ => MetricType::Untyped,
    };

    let mut converted = MetricFamily::new(family.get_name(), metric_type);
    if !family.get_help().is_empty() {
        converted = converted.with_help(family.get_help());
    }
    for metric in family.get_metric() {
        let mut sample = MetricSample::new(sample_value(metric_type, metric));
        for pair in metric.get_label() {
            sample.add_label(Label::new(pair.get_name(), pair.get_value()));
        }
        if metric.has_timestamp_ms() {
            sample = sample.with_timestamp_ms(metric.get_timestamp_ms());
        }
        converted.push_sample(sample);
    }
    converted
}

fn sample_value(metric_type: MetricType, metric: &proto::Metric) -> SampleValue {
    match metric_type {
        MetricType::Counter => SampleValue::Counter(metric.get_counter().get_value()),
        MetricType::Gauge => SampleValue::Gauge(metric.get_gauge().get_value()),
        MetricType::Untyped => SampleValue::Untyped(metric.get_untyped().get_value()),
        MetricType::Histogram => {
            let histogram = metric.get_histogram();
            SampleValue::Histogram {
                sample_count: histogram.get_sample_count(),
                sample_sum: histogram.get_sample_sum(),
                buckets: histogram
                    .get_bucket()
                    .iter()
                    .map(|bucket| Bucket {
                        upper_bound: bucket.get_upper_bound(),
                        cumulative_count: bucket.get_cumulative_count(),
                    })
                    .collect(),
            }
        }
        MetricType::Summary => {
            let summary = metric.get_summary();
            SampleValue::Summary {
                sample_count: summary.get_sample_count(),
                sample_sum: summary.get_sample_sum(),
                quantiles: summary
                    .get_quantile()
                    .iter()
                    .map(|quantile| Quantile {
                        quantile: quantile.get_quantile(),
                        value: quantile.get_value(),
                    })
                    .collect(),
            }
        }
    }
}

/// Encodes a registry holding a gauge, a counter and a histogram.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn delimited_payload() -> Vec<u8> {
    use ::prometheus::{
        Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, ProtobufEncoder, Registry,
    };

    let registry = Registry::new();
    let gauge =
        Gauge::with_opts(Opts::new("queue_depth", "Pending items").const_label("shard", "a"))
            .unwrap();
    gauge.set(3.0);
    let counter = IntCounter::new("jobs_total", "Processed jobs").unwrap();
    counter.inc_by(7);
    let histogram = Histogram::with_opts(
        HistogramOpts::new("latency_seconds", "Request latency").buckets(vec![0.1, 1.0]),
    )
    .unwrap();
    histogram.observe(0.5);
    registry.register(Box::new(gauge)).unwrap();
    registry.register(Box::new(counter)).unwrap();
    registry.register(Box::new(histogram)).unwrap();

    let mut body = Vec::new();
    ProtobufEncoder::new()
        .encode(&registry.gather(), &mut body)
        .unwrap();
    body
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ::prometheus::PROTOBUF_FORMAT;

    #[test]
    fn recognises_the_delimited_media_type() {
        assert!(is_delimited(PROTOBUF_FORMAT));
        assert!(is_delimited(
            "application/vnd.google.protobuf; encoding=delimited; proto=io.prometheus.client.MetricFamily"
        ));
        assert!(!is_delimited(
            "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily"
        ));
        assert!(!is_delimited("text/plain; version=0.0.4"));
    }

    #[test]
    fn decodes_every_family() {
        let families = parse_delimited(&delimited_payload()).unwrap();
        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["jobs_total", "latency_seconds", "queue_depth"]);

        assert_eq!(families[0].metric_type, MetricType::Counter);
        assert_eq!(families[0].samples[0].value, SampleValue::Counter(7.0));

        assert_eq!(families[1].help.as_deref(), Some("Request latency"));
        assert_eq!(
            families[1].samples[0].value,
            SampleValue::Histogram {
                sample_count: 1,
                sample_sum: 0.5,
                buckets: vec![
                    Bucket {
                        upper_bound: 0.1,
                        cumulative_count: 0
                    },
                    Bucket {
                        upper_bound: 1.0,
                        cumulative_count: 1
                    },
                ],
            }
        );

        let depth = &families[2].samples[0];
        assert_eq!(depth.value, SampleValue::Gauge(3.0));
        assert_eq!(depth.label("shard"), Some("a"));
        assert_eq!(depth.timestamp_ms, None);
    }

    #[test]
    fn truncated_payload_is_a_parse_error() {
        let mut body = delimited_payload();
        body.truncate(body.len() - 1);
        let err = parse_delimited(&body).unwrap_err();
        assert!(matches!(err, GatherError::Parse(ref reason) if reason.contains("protocol buffer")));
    }

    #[test]
    fn empty_body_has_no_families() {
        assert!(parse_delimited(&[]).unwrap().is_empty());
    }
}
