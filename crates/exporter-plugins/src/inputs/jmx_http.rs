// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use exporter_agent::config::InputConfig;
use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::input::{Source, SourceKind};
use exporter_agent::metric::{Label, MetricFamily};
use reqwest::header::HeaderMap;

use super::{EndpointDefaults, EndpointOptions};
use crate::http_utils::{build_client, header_map, scrape, DEFAULT_TIMEOUT};
use crate::parsers::jmx::JmxParser;
use crate::parsers::{NameFilter, Parser};

const DEFAULTS: EndpointDefaults = EndpointDefaults {
    port: "80",
    metrics_path: "/jmx",
};

/// Reads a JMX JSON servlet such as the one every Hadoop daemon exposes.
pub struct JmxHttpInput {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    parser: JmxParser,
    labels: Vec<Label>,
}

impl JmxHttpInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: EndpointOptions = config.options()?;
        let mut labels = vec![Label::new("instance", options.instance(&DEFAULTS))];
        labels.extend(options.tag_labels());
        Ok(JmxHttpInput {
            client: build_client(&config.name, options.timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            url: options.url(&DEFAULTS),
            headers: header_map(&config.name, &options.headers)?,
            parser: JmxParser::new(
                NameFilter::new(&options.parser)?,
                options.parser.jmx_ignore_prefix,
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
impl Source for JmxHttpInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Gatherer
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let scrape = scrape(&self.client, &self.url, &self.headers).await?;
        self.parser
            .parse(&scrape.body, &self.labels, scrape.content_type.as_deref())
    }

    fn description(&self) -> &str {
        "Reads beans from a JMX JSON servlet"
    }
}
