// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Pushes every flushed batch to an HTTP endpoint, a Pushgateway by default.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use exporter_agent::config::{deserialize_optional_duration, OutputConfig};
use exporter_agent::errors::{ConfigError, WriteError};
use exporter_agent::metric::MetricFamily;
use exporter_agent::output::{Destination, Serializer};
use exporter_agent::registry::Registry;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use flate2::write::GzEncoder;
use flate2::Compression;
use zstd::stream::write::Encoder;

use crate::http_utils::{build_client, first_line, header_map, DEFAULT_TIMEOUT};
use crate::serializers::prometheus;

pub const DEFAULT_URL: &str = "http://127.0.0.1:9091/metrics/job/kolekti";

const ZSTD_LEVEL: i32 = 3;
const AGENT: &str = concat!("prome-exporters/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentEncoding {
    Identity,
    Gzip,
    Zstd,
}

impl ContentEncoding {
    fn header_value(self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some("gzip"),
            ContentEncoding::Zstd => Some("zstd"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpOutputOptions {
    pub url: String,
    pub method: String,
    pub username: String,
    pub password: String,
    pub headers: BTreeMap<String, String>,
    pub content_encoding: String,
    pub non_retryable_statuscodes: Vec<u16>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
    pub serializer: String,
    pub print_metrics: bool,
}

impl Default for HttpOutputOptions {
    fn default() -> Self {
        HttpOutputOptions {
            url: DEFAULT_URL.to_string(),
            method: "POST".to_string(),
            username: String::new(),
            password: String::new(),
            headers: BTreeMap::new(),
            content_encoding: "identity".to_string(),
            non_retryable_statuscodes: Vec::new(),
            timeout: None,
            serializer: prometheus::NAME.to_string(),
            print_metrics: false,
        }
    }
}

pub struct HttpOutput {
    options: HttpOutputOptions,
    url: String,
    headers: HeaderMap,
    encoding: ContentEncoding,
    serializer: Box<dyn Serializer>,
    connection: Option<(reqwest::Client, Method)>,
}

impl HttpOutput {
    pub fn new(config: &OutputConfig, registry: &Registry) -> Result<Self, ConfigError> {
        let options: HttpOutputOptions = config.options()?;
        let serializer = registry.build_serializer(&options.serializer)?;
        let headers = header_map(&config.name, &options.headers)?;
        let encoding = match options.content_encoding.to_lowercase().as_str() {
            "" | "identity" => ContentEncoding::Identity,
            "gzip" => ContentEncoding::Gzip,
            "zstd" => ContentEncoding::Zstd,
            other => {
                return Err(ConfigError::InvalidOptions {
                    name: config.name.clone(),
                    reason: format!("unsupported content_encoding {other:?}"),
                })
            }
        };
        let url = if options.url.is_empty() {
            DEFAULT_URL.to_string()
        } else {
            options.url.clone()
        };
        Ok(HttpOutput {
            options,
            url,
            headers,
            encoding,
            serializer,
            connection: None,
        })
    }

    fn encode(&self, body: Vec<u8>) -> Result<Vec<u8>, WriteError> {
        match self.encoding {
            ContentEncoding::Identity => Ok(body),
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&body)?;
                Ok(encoder.finish()?)
            }
            ContentEncoding::Zstd => {
                let mut encoder = Encoder::new(Vec::new(), ZSTD_LEVEL)?;
                encoder.write_all(&body)?;
                Ok(encoder.finish()?)
            }
        }
    }
}

#[async_trait]
impl Destination for HttpOutput {
    async fn connect(&mut self) -> Result<(), WriteError> {
        let method = match self.options.method.to_uppercase().as_str() {
            "" | "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                return Err(WriteError::Connect(format!(
                    "invalid method [{}] {other}",
                    self.url
                )))
            }
        };
        let client = build_client("http", self.options.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .map_err(|e| WriteError::Connect(e.to_string()))?;
        self.connection = Some((client, method));
        Ok(())
    }

    async fn write(&mut self, families: &[MetricFamily]) -> Result<(), WriteError> {
        let Some((client, method)) = &self.connection else {
            return Err(WriteError::NotConnected);
        };
        let body = self.serializer.serialize(families)?;
        if self.options.print_metrics {
            debug!("http_output_metrics\n{}", String::from_utf8_lossy(&body));
        }
        let body = self.encode(body)?;

        let mut request = client
            .request(method.clone(), &self.url)
            .header(USER_AGENT, AGENT)
            .header(CONTENT_TYPE, self.serializer.content_type());
        if let Some(encoding) = self.encoding.header_value() {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if !self.options.username.is_empty() || !self.options.password.is_empty() {
            request = request.basic_auth(&self.options.username, Some(&self.options.password));
        }
        let response = request
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| WriteError::Request {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if self
            .options
            .non_retryable_statuscodes
            .contains(&status.as_u16())
        {
            warn!(
                url = %self.url,
                status = status.as_u16(),
                "Dropping batch rejected with a non retryable status"
            );
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(WriteError::Status {
            url: self.url.clone(),
            status: status.as_u16(),
            body: first_line(&body),
        })
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        self.connection = None;
        Ok(())
    }

    fn description(&self) -> &str {
        "A plugin that can transmit metrics over HTTP"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use exporter_agent::metric::{MetricSample, MetricType};
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::io::Read;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        crate::register_defaults(&mut registry).unwrap();
        registry
    }

    fn output(options: serde_json::Value) -> HttpOutput {
        let config = OutputConfig {
            name: "http".to_string(),
            options,
        };
        HttpOutput::new(&config, &registry()).unwrap()
    }

    fn batch() -> Vec<MetricFamily> {
        vec![MetricFamily::new("up", MetricType::Gauge)
            .with_sample(MetricSample::gauge(1.0).with_label("job", "node"))]
    }

    #[tokio::test]
    async fn posts_serialized_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/metrics/job/test")
            .match_header("content-type", prometheus::CONTENT_TYPE)
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .match_header("x-scope-orgid", "tenant")
            .match_body("# TYPE up gauge\nup{job=\"node\"} 1\n")
            .with_status(200)
            .create_async()
            .await;

        let mut output = output(json!({
            "url": format!("{}/metrics/job/test", server.url()),
            "username": "user",
            "password": "pass",
            "headers": {"X-Scope-OrgID": "tenant"},
        }));
        output.connect().await.unwrap();
        output.write(&batch()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn put_with_zstd_encoding() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/push")
            .match_header("content-encoding", "zstd")
            .match_body(Matcher::Any)
            .with_status(202)
            .create_async()
            .await;

        let mut output = output(json!({
            "url": format!("{}/push", server.url()),
            "method": "put",
            "content_encoding": "zstd",
        }));
        output.connect().await.unwrap();
        output.write(&batch()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_with_gzip_encoding() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/push")
            .match_header("content-encoding", "gzip")
            .match_header("content-type", prometheus::CONTENT_TYPE)
            .with_status(200)
            .create_async()
            .await;

        let mut output = output(json!({
            "url": format!("{}/push", server.url()),
            "content_encoding": "GZIP",
        }));
        assert_eq!(output.encoding, ContentEncoding::Gzip);
        output.connect().await.unwrap();
        output.write(&batch()).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn gzip_body_decodes_to_the_serialized_batch() {
        let output = output(json!({ "content_encoding": "gzip" }));
        let plain = output.serializer.serialize(&batch()).unwrap();

        let compressed = output.encode(plain.clone()).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, plain);
    }

    #[tokio::test]
    async fn error_status_carries_first_body_line() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/push")
            .with_status(500)
            .with_body("internal error\ndetails")
            .create_async()
            .await;

        let url = format!("{}/push", server.url());
        let mut output = output(json!({ "url": url }));
        output.connect().await.unwrap();
        let err = output.write(&batch()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("When writing to [{url}] received status code: 500. body: internal error")
        );
    }

    #[tokio::test]
    async fn non_retryable_status_is_swallowed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/push")
            .with_status(400)
            .create_async()
            .await;

        let mut output = output(json!({
            "url": format!("{}/push", server.url()),
            "non_retryable_statuscodes": [400, 409],
        }));
        output.connect().await.unwrap();
        assert!(output.write(&batch()).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_method_fails_connect() {
        let mut output = output(json!({ "method": "DELETE" }));
        let err = output.connect().await.unwrap_err();
        assert!(matches!(err, WriteError::Connect(_)));
        assert!(err.to_string().contains("DELETE"));
    }

    #[tokio::test]
    async fn write_requires_connect_and_close_is_idempotent() {
        let mut output = output(serde_json::Value::Null);
        assert!(matches!(
            output.write(&batch()).await,
            Err(WriteError::NotConnected)
        ));
        output.connect().await.unwrap();
        output.close().await.unwrap();
        output.close().await.unwrap();
        assert!(matches!(
            output.write(&batch()).await,
            Err(WriteError::NotConnected)
        ));
    }

    #[test]
    fn invalid_options_are_config_errors() {
        let config = OutputConfig {
            name: "http".to_string(),
            options: json!({ "serializer": "influx" }),
        };
        assert!(matches!(
            HttpOutput::new(&config, &registry()),
            Err(ConfigError::UnknownSerializer(_))
        ));

        let config = OutputConfig {
            name: "http".to_string(),
            options: json!({ "content_encoding": "brotli" }),
        };
        assert!(matches!(
            HttpOutput::new(&config, &registry()),
            Err(ConfigError::InvalidOptions { .. })
        ));
    }

    #[test]
    fn defaults_point_at_a_local_pushgateway() {
        let output = output(serde_json::Value::Null);
        assert_eq!(output.url, DEFAULT_URL);
        assert_eq!(output.encoding, ContentEncoding::Identity);
    }
}
