// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Exporter configuration.
//!
//! # Sources
//!
//! The configuration is read from a YAML file (`exporters.yaml` by default)
//! and then overlaid with `EXPORTER_`-prefixed environment variables, where a
//! double underscore separates nested keys:
//!
//! ```text
//! EXPORTER_EXPORTER__LOG_LEVEL=debug
//! EXPORTER_EXPORTER__FLUSH_INTERVAL=30s
//! ```
//!
//! # Example
//!
//! ```yaml
//! exporter:
//!   global_tags:
//!     env: prod
//!   flush_interval: 10s
//!   metric_buffer_limit: 10000
//!   metric_batch_size: 10000
//! inputs:
//!   - name: prometheus
//!     interval: 15s
//!     tags:
//!       team: core
//!     options:
//!       host: 127.0.0.1
//!       port: 9100
//! output:
//!   name: http
//!   options:
//!     url: http://127.0.0.1:9091/metrics/job/kolekti
//! ```
//!
//! Durations are given either as seconds (`15`, `0.5`) or as human readable
//! strings (`15s`, `1m 30s`).

pub mod log_level;

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::error;

use crate::buffer::DEFAULT_METRIC_BUFFER_LIMIT;
use crate::errors::ConfigError;
use crate::flusher::DEFAULT_METRIC_BATCH_SIZE;
use crate::input::{DEFAULT_INPUT_INTERVAL, MIN_INTERVAL};
use crate::metric::Label;
use crate::output::DEFAULT_FLUSH_INTERVAL;

use self::log_level::LogLevel;

pub const DEFAULT_CONFIG_FILE: &str = "exporters.yaml";
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:10031";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
const ENV_PREFIX: &str = "EXPORTER_";

/// How the binary waits once the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum CommandType {
    /// Block until a termination signal arrives.
    #[default]
    Signal,
    /// Also serve the exporter's own process metrics over HTTP.
    Server,
}

impl TryFrom<u8> for CommandType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CommandType::Signal),
            1 => Ok(CommandType::Server),
            other => Err(format!("unknown command_type {other}, expected 0 or 1")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub command_type: CommandType,
    pub listen_address: String,
    pub metrics_path: String,
    pub log_level: LogLevel,
    pub global_tags: BTreeMap<String, String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub flush_interval: Option<Duration>,
    pub metric_buffer_limit: usize,
    pub metric_batch_size: usize,
    pub legacy_batch_decrement: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            command_type: CommandType::default(),
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            log_level: LogLevel::default(),
            global_tags: BTreeMap::new(),
            flush_interval: None,
            metric_buffer_limit: DEFAULT_METRIC_BUFFER_LIMIT,
            metric_batch_size: DEFAULT_METRIC_BATCH_SIZE,
            legacy_batch_decrement: false,
        }
    }
}

impl ExporterConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL)
    }

    /// Global tags as labels, sorted by name.
    #[must_use]
    pub fn global_tag_labels(&self) -> Vec<Label> {
        to_labels(&self.global_tags)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub interval: Option<Duration>,
    pub tags: BTreeMap<String, String>,
    pub options: serde_json::Value,
}

impl InputConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_INPUT_INTERVAL)
    }

    #[must_use]
    pub fn tag_labels(&self) -> Vec<Label> {
        to_labels(&self.tags)
    }

    /// Decodes the adapter specific options. Missing options decode like an empty map.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        decode_options(&self.name, &self.options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub name: String,
    pub options: serde_json::Value,
}

impl OutputConfig {
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        decode_options(&self.name, &self.options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exporter: ExporterConfig,
    pub inputs: Vec<InputConfig>,
    pub output: OutputConfig,
}

impl Config {
    /// Reads `path` and applies the environment overlay.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Load(format!(
                "{} does not exist or is not a file",
                path.display()
            )));
        }
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Parses a YAML document without the environment overlay.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Applies defaults and lower bounds.
    #[must_use]
    pub fn normalize(mut self) -> Config {
        let exporter = &mut self.exporter;
        if exporter.metric_buffer_limit == 0 {
            exporter.metric_buffer_limit = DEFAULT_METRIC_BUFFER_LIMIT;
        }
        if exporter.metric_batch_size == 0 {
            exporter.metric_batch_size = DEFAULT_METRIC_BATCH_SIZE;
        }
        exporter.flush_interval = Some(match exporter.flush_interval {
            None => DEFAULT_FLUSH_INTERVAL,
            Some(d) if d.is_zero() => DEFAULT_FLUSH_INTERVAL,
            Some(d) => d.max(MIN_INTERVAL),
        });
        for input in &mut self.inputs {
            input.interval = Some(input.interval.map_or(DEFAULT_INPUT_INTERVAL, |d| d.max(MIN_INTERVAL)));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inputs.is_empty() {
            return Err(ConfigError::Invalid("at least one input is required".to_string()));
        }
        if let Some(position) = self.inputs.iter().position(|i| i.name.is_empty()) {
            return Err(ConfigError::Invalid(format!("input #{position} has no name")));
        }
        if self.output.name.is_empty() {
            return Err(ConfigError::Invalid("output name is required".to_string()));
        }
        if !self.exporter.metrics_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "metrics_path must start with '/', got {:?}",
                self.exporter.metrics_path
            )));
        }
        if self.exporter.command_type == CommandType::Server
            && self.exporter.listen_address.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "listen_address {:?} is not a socket address",
                self.exporter.listen_address
            )));
        }
        Ok(())
    }
}

fn to_labels(tags: &BTreeMap<String, String>) -> Vec<Label> {
    tags.iter().map(|(k, v)| Label::new(k, v)).collect()
}

fn decode_options<T: DeserializeOwned>(
    name: &str,
    options: &serde_json::Value,
) -> Result<T, ConfigError> {
    let options = match options {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(options).map_err(|e| ConfigError::InvalidOptions {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Accepts seconds (integer or float) or a human readable duration string.
pub fn deserialize_optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    struct DurationVisitor;
    impl<'de> serde::de::Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a duration in seconds or a string such as \"10s\"")
        }
        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_secs(v)))
        }
        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            match u64::try_from(v) {
                Ok(v) => self.visit_u64(v),
                Err(_) => {
                    error!("Failed to parse duration: negative durations are not allowed, ignoring");
                    Ok(None)
                }
            }
        }
        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v < 0f64 || !v.is_finite() {
                error!("Failed to parse duration: {v} is not a valid number of seconds, ignoring");
                return Ok(None);
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let v = v.trim();
            if v.is_empty() {
                return Ok(None);
            }
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|e| E::custom(format!("invalid duration {v:?}: {e}")))
        }
        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }
    deserializer.deserialize_any(DurationVisitor)
}
