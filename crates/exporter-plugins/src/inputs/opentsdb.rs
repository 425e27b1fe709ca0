// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use exporter_agent::config::InputConfig;
use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::input::{Source, SourceKind};
use exporter_agent::metric::{Label, MetricFamily};
use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::{EndpointDefaults, EndpointOptions};
use crate::http_utils::{build_client, header_map, scrape, DEFAULT_TIMEOUT};
use crate::parsers::opentsdb::OpenTsdbParser;
use crate::parsers::{NameFilter, Parser};

const DEFAULTS: EndpointDefaults = EndpointDefaults {
    port: "4242",
    metrics_path: "/api/stats",
};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenTsdbOptions {
    #[serde(flatten)]
    pub endpoint: EndpointOptions,
    pub ignore_metric_timestamp: bool,
}

/// Reads the self statistics of an OpenTSDB daemon.
pub struct OpenTsdbInput {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    parser: OpenTsdbParser,
    labels: Vec<Label>,
}

impl OpenTsdbInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: OpenTsdbOptions = config.options()?;
        let endpoint = &options.endpoint;
        let mut labels = vec![Label::new("instance", endpoint.instance(&DEFAULTS))];
        labels.extend(endpoint.tag_labels());
        Ok(OpenTsdbInput {
            client: build_client(&config.name, endpoint.timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            url: endpoint.url(&DEFAULTS),
            headers: header_map(&config.name, &endpoint.headers)?,
            parser: OpenTsdbParser::new(
                NameFilter::new(&endpoint.parser)?,
                options.ignore_metric_timestamp,
            ),
            labels,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Source for OpenTsdbInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Gatherer
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let scrape = scrape(&self.client, &self.url, &self.headers).await?;
        self.parser
            .parse(&scrape.body, &self.labels, scrape.content_type.as_deref())
    }

    fn description(&self) -> &str {
        "Reads OpenTSDB /api/stats"
    }
}
