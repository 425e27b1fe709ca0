// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Hadoop style JMX JSON servlet output: `{"beans": [{...}, ...]}`.
//!
//! A bean named `Hadoop:service=NameNode,name=FSNamesystem,sub=Stats`
//! publishes each numeric attribute as an untyped family called
//! `Hadoop_NameNode_<attribute>`, labelled `name=FSNamesystem`, `sub=Stats`
//! and one label per `tag.*` attribute.

use exporter_agent::errors::GatherError;
use exporter_agent::metric::{Label, MetricFamily, MetricSample, MetricType};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{push_family, NameFilter, Parser};

const TAG_PREFIX: &str = "tag.";

#[derive(Debug)]
pub struct JmxParser {
    filter: NameFilter,
    ignore_prefix: bool,
}

#[derive(Deserialize)]
struct Beans {
    #[serde(default)]
    beans: Vec<Map<String, Value>>,
}

impl JmxParser {
    #[must_use]
    pub fn new(filter: NameFilter, ignore_prefix: bool) -> Self {
        JmxParser {
            filter,
            ignore_prefix,
        }
    }

    fn bean(&self, bean: &Map<String, Value>, tags: &[Label], families: &mut Vec<MetricFamily>) {
        let Some(Value::String(bean_name)) = bean.get("name") else {
            return;
        };
        let Some((service, name)) = bean_name.split_once(",name=") else {
            return;
        };

        let mut prefix = Vec::new();
        if !self.ignore_prefix {
            if let Some((domain, service)) = service.split_once(":service=") {
                prefix.push(domain.trim());
                prefix.push(service.trim());
            }
        }

        let mut labels = Vec::new();
        match name.split_once(",sub=") {
            Some((name, sub)) => {
                labels.push(Label::new("name", name.trim()));
                labels.push(Label::new("sub", sub.trim()));
            }
            None => labels.push(Label::new("name", name.trim())),
        }
        for (key, value) in bean {
            let Some(tag) = key.strip_prefix(TAG_PREFIX) else {
                continue;
            };
            let value = match value {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Value::Number(n) if n.is_f64() => format!("{:.6}", n.as_f64().unwrap_or_default()),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            labels.push(Label::new(tag, value));
        }

        for (key, value) in bean {
            if key == "name" || key.starts_with(TAG_PREFIX) || value.is_null() {
                continue;
            }
            let metric_name = metric_name(&prefix, key);
            if !self.filter.allows(&metric_name) {
                continue;
            }
            let Some(number) = numeric(value) else {
                warn!(metric = %metric_name, value = %value, "value is not numeric");
                continue;
            };

            let mut sample = MetricSample::untyped(number);
            sample.labels = labels.clone();
            for tag in tags {
                sample.add_label(tag.clone());
            }
            push_family(
                families,
                MetricFamily::new(metric_name, MetricType::Untyped).with_sample(sample),
            );
        }
    }
}

impl Parser for JmxParser {
    fn parse(
        &self,
        body: &[u8],
        tags: &[Label],
        _content_type: Option<&str>,
    ) -> Result<Vec<MetricFamily>, GatherError> {
        let beans: Beans = serde_json::from_slice(body)
            .map_err(|e| GatherError::Parse(format!("invalid jmx payload: {e}")))?;

        let mut families = Vec::new();
        for bean in beans.beans.iter().filter(|bean| !bean.is_empty()) {
            self.bean(bean, tags, &mut families);
        }
        Ok(families)
    }
}

fn metric_name(prefix: &[&str], attribute: &str) -> String {
    let mut parts = prefix.to_vec();
    parts.push(attribute.trim());
    parts
        .join("_")
        .chars()
        .map(|c| match c {
            '.' | '|' | '-' | ' ' => '_',
            c => c,
        })
        .collect()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
