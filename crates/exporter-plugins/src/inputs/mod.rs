// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use exporter_agent::config::deserialize_optional_duration;
use exporter_agent::metric::Label;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

use crate::parsers::ParserConfig;

pub mod http;
pub mod http_metrics;
pub mod jmx_http;
pub mod node;
pub mod opentsdb;
pub mod process;
pub mod prometheus;
pub mod zookeeper;

/// Location of a single scrape endpoint, assembled as
/// `<schema>://<host>:<port><metrics_path>`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    pub schema: Option<String>,
    pub host: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub port: Option<String>,
    pub metrics_path: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
    pub headers: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub parser: ParserConfig,
}

/// Defaults for the parts of an endpoint left out of the configuration.
pub(crate) struct EndpointDefaults {
    pub port: &'static str,
    pub metrics_path: &'static str,
}

impl EndpointOptions {
    pub(crate) fn instance(&self, defaults: &EndpointDefaults) -> String {
        let host = non_empty(self.host.as_deref()).unwrap_or("127.0.0.1");
        let port = non_empty(self.port.as_deref()).unwrap_or(defaults.port);
        format!("{host}:{port}")
    }

    pub(crate) fn url(&self, defaults: &EndpointDefaults) -> String {
        let schema = non_empty(self.schema.as_deref()).unwrap_or("http");
        let path = non_empty(self.metrics_path.as_deref()).unwrap_or(defaults.metrics_path);
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!("{schema}://{}{separator}{path}", self.instance(defaults))
    }

    pub(crate) fn tag_labels(&self) -> Vec<Label> {
        self.tags
            .iter()
            .map(|(name, value)| Label::new(name, value))
            .collect()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts a port written either as a number or as a string.
pub fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => {
            error!("Failed to parse value, expected a string or an integer, ignoring");
            Ok(None)
        }
    }
}
