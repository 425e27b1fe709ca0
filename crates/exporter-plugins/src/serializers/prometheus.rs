// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Prometheus text exposition encoder.

use std::fmt::Write as _;

use exporter_agent::errors::SerializeError;
use exporter_agent::metric::{Label, MetricFamily, MetricSample, SampleValue};
use exporter_agent::output::Serializer;

pub const NAME: &str = "prometheus";
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSerializer;

impl Serializer for PrometheusSerializer {
    fn serialize(&self, families: &[MetricFamily]) -> Result<Vec<u8>, SerializeError> {
        let mut out = String::new();
        for family in families {
            encode_family(&mut out, family)?;
        }
        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}

fn encode_family(out: &mut String, family: &MetricFamily) -> Result<(), SerializeError> {
    if family.name.is_empty() {
        return Err(SerializeError::Encode {
            family: String::new(),
            reason: "metric family has no name".to_string(),
        });
    }
    let name = family.name.as_str();
    if let Some(help) = &family.help {
        let _ = writeln!(out, "# HELP {name} {}", escape_help(help));
    }
    let _ = writeln!(out, "# TYPE {name} {}", family.metric_type);

    for sample in &family.samples {
        match &sample.value {
            SampleValue::Untyped(v) | SampleValue::Counter(v) | SampleValue::Gauge(v) => {
                line(out, name, "", &sample.labels, None, *v, sample);
            }
            SampleValue::Histogram {
                sample_count,
                sample_sum,
                buckets,
            } => {
                let mut saw_inf = false;
                for bucket in buckets {
                    saw_inf |= bucket.upper_bound == f64::INFINITY;
                    line(
                        out,
                        name,
                        "_bucket",
                        &sample.labels,
                        Some(("le", bucket.upper_bound)),
                        bucket.cumulative_count as f64,
                        sample,
                    );
                }
                if !saw_inf {
                    line(
                        out,
                        name,
                        "_bucket",
                        &sample.labels,
                        Some(("le", f64::INFINITY)),
                        *sample_count as f64,
                        sample,
                    );
                }
                line(out, name, "_sum", &sample.labels, None, *sample_sum, sample);
                line(
                    out,
                    name,
                    "_count",
                    &sample.labels,
                    None,
                    *sample_count as f64,
                    sample,
                );
            }
            SampleValue::Summary {
                sample_count,
                sample_sum,
                quantiles,
            } => {
                for quantile in quantiles {
                    line(
                        out,
                        name,
                        "",
                        &sample.labels,
                        Some(("quantile", quantile.quantile)),
                        quantile.value,
                        sample,
                    );
                }
                line(out, name, "_sum", &sample.labels, None, *sample_sum, sample);
                line(
                    out,
                    name,
                    "_count",
                    &sample.labels,
                    None,
                    *sample_count as f64,
                    sample,
                );
            }
        }
    }
    Ok(())
}

fn line(
    out: &mut String,
    name: &str,
    suffix: &str,
    labels: &[Label],
    extra: Option<(&str, f64)>,
    value: f64,
    sample: &MetricSample,
) {
    out.push_str(name);
    out.push_str(suffix);
    if !labels.is_empty() || extra.is_some() {
        out.push('{');
        let mut first = true;
        for label in labels {
            if !first {
                out.push(',');
            }
            first = false;
            let _ = write!(out, "{}=\"{}\"", label.name, escape_label_value(&label.value));
        }
        if let Some((key, bound)) = extra {
            if !first {
                out.push(',');
            }
            let _ = write!(out, "{key}=\"{}\"", format_value(bound));
        }
        out.push('}');
    }
    let _ = write!(out, " {}", format_value(value));
    if let Some(ts) = sample.timestamp_ms {
        let _ = write!(out, " {ts}");
    }
    out.push('\n');
}

/// Formats a sample value the way the text format expects, with `+Inf`,
/// `-Inf` and `NaN` spelled out.
#[must_use]
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
