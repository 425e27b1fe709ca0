// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Built-in adapters for `exporter-agent`: HTTP, TCP and host sources, payload
//! parsers, the Prometheus text serializer and the HTTP push destination.
//!
//! [`register_defaults`] installs all of them in a [`Registry`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use exporter_agent::errors::RegistryError;
use exporter_agent::input::SourceKind;
use exporter_agent::registry::Registry;

pub mod http_utils;
pub mod inputs;
pub mod outputs;
pub mod parsers;
pub mod serializers;

/// Registers every built-in input, the `http` output and the `prometheus`
/// serializer.
pub fn register_defaults(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_input("http", SourceKind::Collector, |config| {
        Ok(Box::new(inputs::http::HttpInput::new(config)?))
    })?;
    registry.register_input("prometheus", SourceKind::Collector, |config| {
        Ok(Box::new(inputs::prometheus::PrometheusInput::new(config)?))
    })?;
    registry.register_input("http_metrics", SourceKind::Gatherer, |config| {
        Ok(Box::new(inputs::http_metrics::HttpMetricsInput::new(config)?))
    })?;
    registry.register_input("opentsdb", SourceKind::Gatherer, |config| {
        Ok(Box::new(inputs::opentsdb::OpenTsdbInput::new(config)?))
    })?;
    for name in ["jmx_http", "http_jmx"] {
        registry.register_input(name, SourceKind::Gatherer, |config| {
            Ok(Box::new(inputs::jmx_http::JmxHttpInput::new(config)?))
        })?;
    }
    registry.register_input("zookeeper", SourceKind::Gatherer, |config| {
        Ok(Box::new(inputs::zookeeper::ZookeeperInput::new(config)?))
    })?;
    for name in ["process", "prometheus_process"] {
        registry.register_input(name, SourceKind::Collector, |config| {
            Ok(Box::new(inputs::process::ProcessInput::new(config)?))
        })?;
    }
    registry.register_input("prometheus_node_exporter", SourceKind::Collector, |config| {
        Ok(Box::new(inputs::node::NodeInput::new(config)?))
    })?;

    registry.register_output("http", |config, registry| {
        Ok(Box::new(outputs::http::HttpOutput::new(config, registry)?))
    })?;

    registry.register_serializer(serializers::prometheus::NAME, || {
        Box::new(serializers::prometheus::PrometheusSerializer)
    })?;
    Ok(())
}
