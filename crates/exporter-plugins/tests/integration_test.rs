// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use exporter_agent::agent::Agent;
use exporter_agent::config::Config;
use exporter_agent::registry::Registry;
use exporter_plugins::register_defaults;
use mockito::{Matcher, Server};
use tokio::time::{sleep, timeout, Duration};

fn registry() -> Registry {
    let mut registry = Registry::new();
    register_defaults(&mut registry).expect("failed to register defaults");
    registry
}

#[tokio::test]
async fn scraped_metrics_are_pushed_with_global_tags() {
    let mut target = Server::new_async().await;
    let _scrape = target
        .mock("GET", "/metrics")
        .with_status(200)
        .with_body("# TYPE node_load1 gauge\nnode_load1 0.5\n")
        .expect_at_least(1)
        .create_async()
        .await;

    let mut gateway = Server::new_async().await;
    let push = gateway
        .mock("POST", "/metrics/job/test")
        .match_header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("# TYPE node_load1 gauge".to_string()),
            Matcher::Regex("env=\"test\"".to_string()),
            Matcher::Regex("team=\"core\"".to_string()),
            Matcher::Regex(format!("instance=\"{}\"", target.host_with_port())),
        ]))
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let address = target.host_with_port();
    let (host, port) = address.split_once(':').expect("mock address has a port");
    let yaml = format!(
        r#"
exporter:
  flush_interval: 1s
  global_tags:
    env: test
inputs:
  - name: prometheus
    interval: 1s
    tags:
      team: core
    options:
      host: "{host}"
      port: "{port}"
output:
  name: http
  options:
    url: "{}/metrics/job/test"
"#,
        gateway.url()
    );
    let config = Config::from_yaml_str(&yaml).expect("failed to parse config");
    let mut agent = Agent::new(config, &registry()).expect("failed to build agent");
    agent.run().await.expect("failed to run agent");

    let wait = async {
        while !push.matched_async().await {
            sleep(Duration::from_millis(100)).await;
        }
    };
    let result = timeout(Duration::from_secs(5), wait).await;
    agent.stop().await.expect("failed to stop agent");

    match result {
        Ok(()) => push.assert_async().await,
        Err(_) => panic!("timed out before the gateway received a push"),
    }
}

#[tokio::test]
async fn unreachable_source_fails_run() {
    let yaml = r#"
inputs:
  - name: prometheus
    options:
      host: 127.0.0.1
      port: 1
      timeout: 1s
output:
  name: http
"#;
    let config = Config::from_yaml_str(yaml).expect("failed to parse config");
    let mut agent = Agent::new(config, &registry()).expect("failed to build agent");
    let err = agent.run().await.expect_err("run should fail");
    assert!(err.to_string().contains("prometheus"), "{err}");
    agent.stop().await.expect("failed to stop agent");
}

#[test]
fn unknown_parser_fails_agent_construction() {
    let yaml = r#"
inputs:
  - name: http
    options:
      urls: ["http://127.0.0.1:1/metrics"]
      parser:
        name: graphite
output:
  name: http
"#;
    let config = Config::from_yaml_str(yaml).expect("failed to parse config");
    assert!(Agent::new(config, &registry()).is_err());
}
