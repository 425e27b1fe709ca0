// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use exporter_agent::config::{deserialize_optional_duration, InputConfig};
use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::flusher::merge_by_name;
use exporter_agent::input::{Source, SourceKind};
use exporter_agent::metric::{Label, MetricFamily};
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Deserialize;
use tracing::error;

use crate::http_utils::{build_client, header_map, instance_of, scrape, DEFAULT_TIMEOUT};
use crate::parsers::{build_parser, Parser, ParserConfig};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpInputOptions {
    pub urls: Vec<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
    pub headers: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub parser: ParserConfig,
}

/// Scrapes a list of URLs with a configurable parser and merges the results.
///
/// A URL that cannot be reached or parsed is logged and skipped, so one bad
/// endpoint never hides the others.
pub struct HttpInput {
    client: reqwest::Client,
    urls: Vec<String>,
    headers: HeaderMap,
    parser: Box<dyn Parser>,
    tags: Vec<Label>,
}

impl HttpInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: HttpInputOptions = config.options()?;
        if options.urls.is_empty() {
            return Err(ConfigError::InvalidOptions {
                name: config.name.clone(),
                reason: "at least one url is required".to_string(),
            });
        }
        Ok(HttpInput {
            client: build_client(&config.name, options.timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            headers: header_map(&config.name, &options.headers)?,
            parser: build_parser(&options.parser)?,
            tags: options
                .tags
                .iter()
                .map(|(name, value)| Label::new(name, value))
                .collect(),
            urls: options.urls,
        })
    }

    async fn gather_url(&self, raw: &str) -> Result<Vec<MetricFamily>, GatherError> {
        let url = Url::parse(raw).map_err(|e| GatherError::Request {
            url: raw.to_string(),
            reason: format!("invalid url: {e}"),
        })?;
        let scrape = scrape(&self.client, url.as_str(), &self.headers).await?;
        let instance = [Label::new("instance", instance_of(&url))];
        self.parser
            .parse(&scrape.body, &instance, scrape.content_type.as_deref())
    }
}

#[async_trait]
impl Source for HttpInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Collector
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let mut families = Vec::new();
        for url in &self.urls {
            match self.gather_url(url).await {
                Ok(found) => families.extend(found),
                Err(e) => error!(url = %url, error = %e, "gather_server_failed"),
            }
        }
        Ok(merge_by_name(families))
    }

    fn tags(&self) -> Vec<Label> {
        self.tags.clone()
    }

    fn description(&self) -> &str {
        "Reads metrics from a list of HTTP endpoints"
    }
}
