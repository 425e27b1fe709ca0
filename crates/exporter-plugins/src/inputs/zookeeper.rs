// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! ZooKeeper `mntr` four letter word over plain TCP.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use exporter_agent::config::{deserialize_optional_duration, InputConfig};
use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::flusher::merge_by_name;
use exporter_agent::input::{Source, SourceKind};
use exporter_agent::metric::{Label, MetricFamily, MetricSample, MetricType};
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error};

pub const DEFAULT_SERVER: &str = "127.0.0.1:2181";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_PORT: &str = "2181";
const METRIC_PREFIX: &str = "zookeeper_";
const MNTR_LINE: &str = r"^(zk_\w+)\s+([\w.\-]+)";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZookeeperOptions {
    pub servers: Vec<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
    pub tags: BTreeMap<String, String>,
}

pub struct ZookeeperInput {
    servers: Vec<String>,
    timeout: Duration,
    tags: Vec<Label>,
    line: Regex,
}

impl ZookeeperInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: ZookeeperOptions = config.options()?;
        let servers = if options.servers.is_empty() {
            vec![DEFAULT_SERVER.to_string()]
        } else {
            options.servers.iter().map(|s| with_default_port(s)).collect()
        };
        let timeout = options
            .timeout
            .filter(|t| *t >= Duration::from_secs(1))
            .unwrap_or(DEFAULT_TIMEOUT);
        let line = Regex::new(MNTR_LINE).map_err(|e| ConfigError::InvalidOptions {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(ZookeeperInput {
            servers,
            timeout,
            tags: options
                .tags
                .iter()
                .map(|(name, value)| Label::new(name, value))
                .collect(),
            line,
        })
    }

    #[must_use]
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    async fn mntr(&self, address: &str) -> Result<String, GatherError> {
        let exchange = async {
            let mut stream = TcpStream::connect(address).await?;
            stream.write_all(b"mntr\n").await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };
        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| GatherError::Timeout(self.timeout))??;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    fn server_labels(&self, address: &str) -> Vec<Label> {
        let (host, port) = address.rsplit_once(':').unwrap_or((address, DEFAULT_PORT));
        let host = if host.is_empty() { "localhost" } else { host };
        let mut labels = vec![
            Label::new("server", host),
            Label::new("port", port),
            Label::new("instance", address),
        ];
        for tag in &self.tags {
            match labels.iter_mut().find(|l| l.name == tag.name) {
                Some(existing) => existing.value.clone_from(&tag.value),
                None => labels.push(tag.clone()),
            }
        }
        labels
    }

    /// Turns an `mntr` answer into gauges. A line that does not look like a
    /// `zk_` key and value fails the whole answer.
    pub fn parse_mntr(
        &self,
        response: &str,
        labels: &[Label],
    ) -> Result<Vec<MetricFamily>, GatherError> {
        let mut families = vec![up(1.0, labels)];
        for line in response.lines().filter(|l| !l.trim().is_empty()) {
            let captures = self.line.captures(line).ok_or_else(|| {
                GatherError::Parse(format!("unexpected line in mntr response: {line:?}"))
            })?;
            let key = &captures[1];
            let value = &captures[2];
            let name = key.strip_prefix("zk_").unwrap_or(key);

            let sample = match name {
                "server_state" => MetricSample::gauge(1.0).with_label("state", value),
                "version" => MetricSample::gauge(1.0).with_label("version", value),
                _ => match value.parse::<f64>() {
                    Ok(v) => MetricSample::gauge(v),
                    Err(_) => {
                        debug!(key, value, "skipping non numeric mntr value");
                        continue;
                    }
                },
            };
            let mut family = MetricFamily::new(format!("{METRIC_PREFIX}{name}"), MetricType::Gauge)
                .with_sample(sample);
            family.add_labels(labels);
            families.push(family);
        }
        Ok(merge_by_name(families))
    }
}

fn with_default_port(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_PORT}")
    }
}

fn up(value: f64, labels: &[Label]) -> MetricFamily {
    let mut family = MetricFamily::new(format!("{METRIC_PREFIX}up"), MetricType::Gauge)
        .with_sample(MetricSample::gauge(value));
    family.add_labels(labels);
    family
}

#[async_trait]
impl Source for ZookeeperInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Gatherer
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let mut families = Vec::new();
        for address in &self.servers {
            let labels = self.server_labels(address);
            let result = match self.mntr(address).await {
                Ok(response) => self.parse_mntr(&response, &labels),
                Err(e) => Err(e),
            };
            match result {
                Ok(found) => families.extend(found),
                Err(e) => {
                    error!(server = %address, error = %e, "gather_server_failed");
                    families.push(up(0.0, &labels));
                }
            }
        }
        Ok(merge_by_name(families))
    }

    fn description(&self) -> &str {
        "Reads 'mntr' stats from one or many zookeeper servers"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    const MNTR: &str = "zk_version\t3.4.6-1569965, built on 02/20/2014 09:09 GMT\n\
                        zk_avg_latency\t0\n\
                        zk_outstanding_requests\t2\n\
                        zk_server_state\tleader\n\
                        zk_znode_count\t4\n";

    fn input(options: serde_json::Value) -> ZookeeperInput {
        ZookeeperInput::new(&InputConfig {
            name: "zookeeper".to_string(),
            options,
            ..InputConfig::default()
        })
        .unwrap()
    }

    async fn fake_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = tokio::io::BufStream::new(stream);
            let mut command = String::new();
            stream.read_line(&mut command).await.unwrap();
            assert_eq!(command, "mntr\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
        });
        address
    }

    #[test]
    fn options_fall_back_to_defaults() {
        let zk = input(json!({ "servers": ["zk-1", "zk-2:2182"], "timeout": "10ms" }));
        assert_eq!(zk.servers(), ["zk-1:2181", "zk-2:2182"]);
        assert_eq!(zk.timeout, DEFAULT_TIMEOUT);

        let zk = input(serde_json::Value::Null);
        assert_eq!(zk.servers(), [DEFAULT_SERVER]);
    }

    #[test]
    fn mntr_lines_become_gauges() {
        let zk = input(json!({ "tags": {"cluster": "main"} }));
        let labels = zk.server_labels("10.0.0.5:2181");
        let families = zk.parse_mntr(MNTR, &labels).unwrap();

        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "zookeeper_up",
                "zookeeper_version",
                "zookeeper_avg_latency",
                "zookeeper_outstanding_requests",
                "zookeeper_server_state",
                "zookeeper_znode_count",
            ]
        );
        assert!(families.iter().all(|f| f.metric_type == MetricType::Gauge));

        let version = &families[1].samples[0];
        assert_eq!(version.label("version"), Some("3.4.6-1569965"));
        assert_eq!(version.value.as_f64(), Some(1.0));

        let state = &families[4].samples[0];
        assert_eq!(state.label("state"), Some("leader"));
        assert_eq!(state.label("server"), Some("10.0.0.5"));
        assert_eq!(state.label("port"), Some("2181"));
        assert_eq!(state.label("cluster"), Some("main"));

        assert_eq!(families[3].samples[0].value.as_f64(), Some(2.0));
    }

    #[test]
    fn unexpected_line_fails_the_answer() {
        let zk = input(serde_json::Value::Null);
        assert!(matches!(
            zk.parse_mntr("This ZooKeeper instance is not currently serving requests\n", &[]),
            Err(GatherError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn gathers_over_tcp() {
        let address = fake_server(MNTR).await;
        let zk = input(json!({ "servers": [address.clone()] }));

        let families = zk.gather().await.unwrap();
        assert_eq!(families[0].name, "zookeeper_up");
        assert_eq!(families[0].samples[0].value.as_f64(), Some(1.0));
        assert_eq!(families[0].samples[0].label("instance"), Some(address.as_str()));
        assert!(families.iter().any(|f| f.name == "zookeeper_znode_count"));
    }

    #[tokio::test]
    async fn unreachable_server_reports_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let zk = input(json!({ "servers": [address] }));
        let families = zk.gather().await.unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "zookeeper_up");
        assert_eq!(families[0].samples[0].value.as_f64(), Some(0.0));
    }
}
