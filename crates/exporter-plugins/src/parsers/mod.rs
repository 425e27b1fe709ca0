// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Payload parsers shared by the HTTP sources.
//!
//! A parser turns a response body into metric families, drops the names
//! rejected by the configured whitelist and blacklist, and appends the caller
//! supplied labels (typically `instance`) to every sample.

use std::fmt;

use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::metric::{Label, MetricFamily};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

pub mod delimited;
pub mod jmx;
pub mod opentsdb;
pub mod prometheus;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// `prometheus` (also when empty), `jmx` or `opentsdb`.
    pub name: String,
    pub prefix_whitelist: Vec<String>,
    pub prefix_blacklist: Vec<String>,
    pub jmx_ignore_prefix: bool,
    /// Drops source timestamps. Honoured by the jmx and opentsdb parsers.
    pub jmx_ignore_timestamp: bool,
}

pub trait Parser: Send + Sync + fmt::Debug {
    fn parse(
        &self,
        body: &[u8],
        tags: &[Label],
        content_type: Option<&str>,
    ) -> Result<Vec<MetricFamily>, GatherError>;
}

/// Whitelist and blacklist applied to metric names.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
}

impl NameFilter {
    pub fn new(config: &ParserConfig) -> Result<Self, ConfigError> {
        Ok(NameFilter {
            whitelist: compile(&config.prefix_whitelist)?,
            blacklist: compile(&config.prefix_blacklist)?,
        })
    }

    /// A name passes when it matches any whitelist entry (or the whitelist
    /// is empty) and no blacklist entry.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|re| re.is_match(name)) {
            debug!(metric = name, "filter metric with whitelist");
            return false;
        }
        if self.blacklist.iter().any(|re| re.is_match(name)) {
            debug!(metric = name, "filter metric with blacklist");
            return false;
        }
        true
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidOptions {
                name: "parser".to_string(),
                reason: format!("invalid name pattern {pattern:?}: {e}"),
            })
        })
        .collect()
}

/// Builds the parser named in `config`.
pub fn build_parser(config: &ParserConfig) -> Result<Box<dyn Parser>, ConfigError> {
    let filter = NameFilter::new(config)?;
    match config.name.as_str() {
        "" | "prometheus" => Ok(Box::new(prometheus::PrometheusParser::new(filter))),
        "jmx" => Ok(Box::new(jmx::JmxParser::new(
            filter,
            config.jmx_ignore_prefix,
        ))),
        "opentsdb" => Ok(Box::new(opentsdb::OpenTsdbParser::new(
            filter,
            config.jmx_ignore_timestamp,
        ))),
        other => Err(ConfigError::InvalidOptions {
            name: "parser".to_string(),
            reason: format!("unsupported parser type {other:?}"),
        }),
    }
}

/// Appends `family` to `families`, merging it into an earlier family of the
/// same name so the first-seen order is kept.
pub(crate) fn push_family(families: &mut Vec<MetricFamily>, family: MetricFamily) {
    match families.iter_mut().find(|f| f.name == family.name) {
        Some(existing) => existing.append(family),
        None => families.push(family),
    }
}
