// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Prometheus exposition formats: text version 0.0.4, and the delimited
//! protobuf stream when the response declares it.
//!
//! `_bucket`, `_sum` and `_count` lines of a declared histogram, and the
//! quantile, `_sum` and `_count` lines of a declared summary, are folded into
//! one distribution sample per label set. Families without samples are
//! dropped.

use std::collections::HashMap;

use exporter_agent::errors::GatherError;
use exporter_agent::metric::{
    Bucket, Label, MetricFamily, MetricSample, MetricType, Quantile, SampleValue,
};

use super::delimited::{self, is_delimited};
use super::{NameFilter, Parser};

const PROTOBUF_MEDIA_TYPE: &str = "application/vnd.google.protobuf";

#[derive(Debug)]
pub struct PrometheusParser {
    filter: NameFilter,
}

impl PrometheusParser {
    #[must_use]
    pub fn new(filter: NameFilter) -> Self {
        PrometheusParser { filter }
    }
}

impl Parser for PrometheusParser {
    fn parse(
        &self,
        body: &[u8],
        tags: &[Label],
        content_type: Option<&str>,
    ) -> Result<Vec<MetricFamily>, GatherError> {
        let mut families = match content_type {
            Some(ct) if is_delimited(ct) => delimited::parse_delimited(body)?,
            Some(ct) if ct.contains(PROTOBUF_MEDIA_TYPE) => {
                return Err(GatherError::Parse(format!(
                    "unsupported protobuf encoding: {ct}"
                )));
            }
            _ => {
                let text = std::str::from_utf8(body)
                    .map_err(|e| GatherError::Parse(format!("body is not valid utf-8: {e}")))?;
                parse_text(text)?
            }
        };
        families.retain(|family| self.filter.allows(&family.name));
        for family in &mut families {
            family.add_labels(tags);
        }
        Ok(families)
    }
}

/// Parses a whole text exposition into families, in first-seen order.
pub fn parse_text(text: &str) -> Result<Vec<MetricFamily>, GatherError> {
    let mut state = TextState::default();
    for (number, line) in text.lines().enumerate() {
        state.line(line).map_err(|reason| {
            GatherError::Parse(format!(
                "text format parsing error in line {}: {reason}",
                number + 1
            ))
        })?;
    }
    Ok(state.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Plain,
    Bucket,
    Quantile,
    Sum,
    Count,
}

#[derive(Default)]
struct TextState {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
}

impl TextState {
    fn line(&mut self, line: &str) -> Result<(), String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match line.strip_prefix('#') {
            Some(comment) => self.comment(comment),
            None => self.sample(line),
        }
    }

    fn comment(&mut self, comment: &str) -> Result<(), String> {
        let (keyword, rest) = split_token(comment);
        match keyword {
            "HELP" => {
                let (name, help) = split_token(rest);
                if name.is_empty() {
                    return Err("HELP without a metric name".to_string());
                }
                self.family_mut(name, MetricType::Untyped).help = Some(unescape_help(help));
            }
            "TYPE" => {
                let (name, type_name) = split_token(rest);
                if name.is_empty() {
                    return Err("TYPE without a metric name".to_string());
                }
                let metric_type = type_name.parse::<MetricType>()?;
                let family = self.family_mut(name, metric_type);
                if !family.samples.is_empty() && family.metric_type != metric_type {
                    return Err(format!("TYPE for {name} appears after its samples"));
                }
                family.metric_type = metric_type;
            }
            _ => {}
        }
        Ok(())
    }

    fn sample(&mut self, line: &str) -> Result<(), String> {
        let (name, labels, rest) = split_sample(line)?;
        let mut fields = rest.split_whitespace();
        let value = parse_value(fields.next().ok_or("missing sample value")?)?;
        let timestamp_ms = fields
            .next()
            .map(|t| {
                t.parse::<i64>()
                    .map_err(|e| format!("invalid timestamp {t:?}: {e}"))
            })
            .transpose()?;
        if fields.next().is_some() {
            return Err("unexpected text after the timestamp".to_string());
        }

        let (family_name, role) = self.resolve(name);
        if role != Role::Plain {
            return self.distribution(family_name, role, labels, value, timestamp_ms);
        }

        let metric_type = self.declared_type(name).unwrap_or_default();
        let value = match metric_type {
            MetricType::Counter => SampleValue::Counter(value),
            MetricType::Gauge => SampleValue::Gauge(value),
            MetricType::Untyped => SampleValue::Untyped(value),
            MetricType::Histogram | MetricType::Summary => {
                return Err(format!(
                    "sample {name} lacks the suffix or label of a {metric_type}"
                ));
            }
        };
        let mut sample = MetricSample::new(value);
        sample.labels = labels;
        sample.timestamp_ms = timestamp_ms;
        self.family_mut(name, metric_type).push_sample(sample);
        Ok(())
    }

    fn distribution(
        &mut self,
        family_name: &str,
        role: Role,
        mut labels: Vec<Label>,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), String> {
        let bound = match role {
            Role::Bucket => Some(take_bound(&mut labels, "le")?),
            Role::Quantile => Some(take_bound(&mut labels, "quantile")?),
            _ => None,
        };
        let family_index = *self
            .index
            .get(family_name)
            .ok_or_else(|| format!("{family_name} was never declared"))?;
        let family = &mut self.families[family_index];

        let sample_index = match family.samples.iter().position(|s| s.labels == labels) {
            Some(i) => i,
            None => {
                let empty = if family.metric_type == MetricType::Histogram {
                    SampleValue::Histogram {
                        sample_count: 0,
                        sample_sum: 0.0,
                        buckets: Vec::new(),
                    }
                } else {
                    SampleValue::Summary {
                        sample_count: 0,
                        sample_sum: 0.0,
                        quantiles: Vec::new(),
                    }
                };
                let mut sample = MetricSample::new(empty);
                sample.labels = labels;
                family.samples.push(sample);
                family.samples.len() - 1
            }
        };
        let sample = &mut family.samples[sample_index];
        if timestamp_ms.is_some() {
            sample.timestamp_ms = timestamp_ms;
        }

        match (&mut sample.value, role, bound) {
            (SampleValue::Histogram { buckets, .. }, Role::Bucket, Some(upper_bound)) => {
                buckets.push(Bucket {
                    upper_bound,
                    cumulative_count: value as u64,
                });
            }
            (SampleValue::Summary { quantiles, .. }, Role::Quantile, Some(quantile)) => {
                quantiles.push(Quantile { quantile, value });
            }
            (
                SampleValue::Histogram { sample_sum, .. } | SampleValue::Summary { sample_sum, .. },
                Role::Sum,
                _,
            ) => *sample_sum = value,
            (
                SampleValue::Histogram { sample_count, .. }
                | SampleValue::Summary { sample_count, .. },
                Role::Count,
                _,
            ) => *sample_count = value as u64,
            _ => return Err(format!("unexpected sample for {family_name}")),
        }
        Ok(())
    }

    fn resolve<'a>(&self, name: &'a str) -> (&'a str, Role) {
        if self.declared_type(name) == Some(MetricType::Summary) {
            return (name, Role::Quantile);
        }
        for (suffix, role) in [
            ("_bucket", Role::Bucket),
            ("_sum", Role::Sum),
            ("_count", Role::Count),
        ] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            match (self.declared_type(base), role) {
                (Some(MetricType::Histogram), _)
                | (Some(MetricType::Summary), Role::Sum | Role::Count) => return (base, role),
                _ => {}
            }
        }
        (name, Role::Plain)
    }

    fn declared_type(&self, name: &str) -> Option<MetricType> {
        self.index
            .get(name)
            .map(|&i| self.families[i].metric_type)
    }

    fn family_mut(&mut self, name: &str, metric_type: MetricType) -> &mut MetricFamily {
        let i = match self.index.get(name) {
            Some(&i) => i,
            None => {
                self.families.push(MetricFamily::new(name, metric_type));
                self.index.insert(name.to_string(), self.families.len() - 1);
                self.families.len() - 1
            }
        };
        &mut self.families[i]
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .filter(|family| !family.samples.is_empty())
            .collect()
    }
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn split_sample(line: &str) -> Result<(&str, Vec<Label>, &str), String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("missing metric name".to_string());
    }
    let rest = line[name_end..].trim_start();
    match rest.strip_prefix('{') {
        Some(labels) => {
            let (labels, rest) = parse_labels(labels)?;
            Ok((name, labels, rest))
        }
        None => Ok((name, Vec::new(), rest)),
    }
}

fn parse_labels(s: &str) -> Result<(Vec<Label>, &str), String> {
    let mut labels = Vec::new();
    let mut rest = s;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }
        let eq = rest.find('=').ok_or("expected '=' after label name")?;
        let name = rest[..eq].trim();
        if name.is_empty() {
            return Err("empty label name".to_string());
        }
        rest = rest[eq + 1..]
            .trim_start()
            .strip_prefix('"')
            .ok_or("expected '\"' to open label value")?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err("unterminated escape in label value".to_string()),
                },
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value for label {name}")),
            }
        };
        labels.push(Label::new(name, value));

        rest = rest[end + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(format!("expected ',' or '}}' after label {name}"));
        }
    }
}

fn take_bound(labels: &mut Vec<Label>, key: &str) -> Result<f64, String> {
    let position = labels
        .iter()
        .position(|l| l.name == key)
        .ok_or_else(|| format!("missing {key} label"))?;
    parse_value(&labels.remove(position).value)
}

fn parse_value(token: &str) -> Result<f64, String> {
    match token {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => token
            .parse::<f64>()
            .map_err(|e| format!("invalid value {token:?}: {e}")),
    }
}

fn unescape_help(help: &str) -> String {
    let mut out = String::with_capacity(help.len());
    let mut chars = help.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
