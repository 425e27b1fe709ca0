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
use crate::parsers::prometheus::PrometheusParser;
use crate::parsers::{NameFilter, Parser};

const DEFAULTS: EndpointDefaults = EndpointDefaults {
    port: "80",
    metrics_path: "/metrics",
};

/// Gatherer form of the Prometheus scrape: `instance=<host:port>` is written
/// into every sample by the parse itself, and the input has no tags.
pub struct HttpMetricsInput {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    parser: PrometheusParser,
    labels: Vec<Label>,
}

impl HttpMetricsInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: EndpointOptions = config.options()?;
        let mut labels = vec![Label::new("instance", options.instance(&DEFAULTS))];
        labels.extend(options.tag_labels());
        Ok(HttpMetricsInput {
            client: build_client(&config.name, options.timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            url: options.url(&DEFAULTS),
            headers: header_map(&config.name, &options.headers)?,
            parser: PrometheusParser::new(NameFilter::new(&options.parser)?),
            labels,
        })
    }
}

#[async_trait]
impl Source for HttpMetricsInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Gatherer
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let scrape = scrape(&self.client, &self.url, &self.headers).await?;
        self.parser
            .parse(&scrape.body, &self.labels, scrape.content_type.as_deref())
    }

    fn description(&self) -> &str {
        "Scrapes one Prometheus endpoint, text or delimited protobuf"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    #[tokio::test]
    async fn protobuf_samples_carry_the_instance_label() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/federate")
            .with_status(200)
            .with_header("content-type", ::prometheus::PROTOBUF_FORMAT)
            .with_body(crate::parsers::delimited::delimited_payload())
            .create_async()
            .await;
        let address = server.host_with_port();
        let (host, port) = address.split_once(':').unwrap();

        let input = HttpMetricsInput::new(&InputConfig {
            name: "http_metrics".to_string(),
            options: json!({ "host": host, "port": port, "metrics_path": "/federate" }),
            ..InputConfig::default()
        })
        .unwrap();
        let families = input.gather().await.unwrap();

        assert_eq!(families.len(), 3);
        assert!(families
            .iter()
            .flat_map(|f| &f.samples)
            .all(|s| s.label("instance") == Some(address.as_str())));
        assert!(input.tags().is_empty());
    }
}
