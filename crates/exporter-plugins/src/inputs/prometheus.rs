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

/// Scrapes one Prometheus endpoint. Every sample is labelled with
/// `instance=<host:port>` and the configured tags.
pub struct PrometheusInput {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    parser: PrometheusParser,
    tags: Vec<Label>,
}

impl PrometheusInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: EndpointOptions = config.options()?;
        let mut tags = vec![Label::new("instance", options.instance(&DEFAULTS))];
        tags.extend(options.tag_labels());
        Ok(PrometheusInput {
            client: build_client(&config.name, options.timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            url: options.url(&DEFAULTS),
            headers: header_map(&config.name, &options.headers)?,
            parser: PrometheusParser::new(NameFilter::new(&options.parser)?),
            tags,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Source for PrometheusInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Collector
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let scrape = scrape(&self.client, &self.url, &self.headers).await?;
        self.parser
            .parse(&scrape.body, &[], scrape.content_type.as_deref())
    }

    fn tags(&self) -> Vec<Label> {
        self.tags.clone()
    }

    fn description(&self) -> &str {
        "Reads metrics from one Prometheus exposition endpoint"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn input(options: serde_json::Value) -> PrometheusInput {
        PrometheusInput::new(&InputConfig {
            name: "prometheus".to_string(),
            options,
            ..InputConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn defaults_target_local_metrics() {
        let input = input(serde_json::Value::Null);
        assert_eq!(input.url(), "http://127.0.0.1:80/metrics");
        assert_eq!(input.tags(), vec![Label::new("instance", "127.0.0.1:80")]);
    }

    #[tokio::test]
    async fn gathers_text_exposition() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics")
            .with_status(200)
            .with_body("# TYPE up gauge\nup 1\n# TYPE go_goroutines gauge\ngo_goroutines 7\n")
            .create_async()
            .await;
        let address = server.host_with_port();
        let (host, port) = address.split_once(':').unwrap();

        let input = input(json!({
            "host": host,
            "port": port,
            "tags": {"team": "core"},
            "parser": {"prefix_blacklist": ["^go_"]},
        }));
        let families = input.gather().await.unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "up");
        assert_eq!(
            input.tags(),
            vec![Label::new("instance", address.as_str()), Label::new("team", "core")]
        );
    }

    #[tokio::test]
    async fn gathers_delimited_protobuf_exposition() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics")
            .with_status(200)
            .with_header("content-type", ::prometheus::PROTOBUF_FORMAT)
            .with_body(crate::parsers::delimited::delimited_payload())
            .create_async()
            .await;
        let address = server.host_with_port();
        let (host, port) = address.split_once(':').unwrap();

        let input = input(json!({ "host": host, "port": port }));
        let families = input.gather().await.unwrap();
        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["jobs_total", "latency_seconds", "queue_depth"]);
    }

    #[tokio::test]
    async fn non_success_status_fails_gather() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;
        let address = server.host_with_port();
        let (host, port) = address.split_once(':').unwrap();

        let input = input(json!({ "host": host, "port": port }));
        assert!(matches!(
            input.gather().await,
            Err(GatherError::Status { status: 503, .. })
        ));
    }
}
