// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Host metrics in node exporter naming: load, cpu, memory and filesystems.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use exporter_agent::config::InputConfig;
use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::input::{Source, SourceKind};
use exporter_agent::metric::{Label, MetricFamily, MetricSample, MetricType};
use serde::Deserialize;
use sysinfo::{Disks, System};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeCollector {
    Cpu,
    Memory,
    Load,
    Filesystem,
}

impl NodeCollector {
    const ALL: [NodeCollector; 4] = [
        NodeCollector::Cpu,
        NodeCollector::Memory,
        NodeCollector::Load,
        NodeCollector::Filesystem,
    ];
}

impl FromStr for NodeCollector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(NodeCollector::Cpu),
            "memory" | "meminfo" => Ok(NodeCollector::Memory),
            "load" | "loadavg" => Ok(NodeCollector::Load),
            "filesystem" => Ok(NodeCollector::Filesystem),
            other => Err(format!("unknown collector {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    /// Collectors to run. Empty runs all of them.
    pub filters: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

pub struct NodeInput {
    collectors: Vec<NodeCollector>,
    system: Mutex<System>,
    tags: Vec<Label>,
}

impl NodeInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: NodeOptions = config.options()?;
        let mut collectors = options
            .filters
            .iter()
            .map(|filter| filter.parse::<NodeCollector>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ConfigError::InvalidOptions {
                name: config.name.clone(),
                reason,
            })?;
        if collectors.is_empty() {
            collectors = NodeCollector::ALL.to_vec();
        }
        collectors.sort();
        collectors.dedup();

        let mut system = System::new();
        // Usage is a delta against the previous refresh.
        system.refresh_cpu_all();

        let mut tags = vec![Label::new(
            "instance",
            System::host_name().unwrap_or_else(|| "localhost".to_string()),
        )];
        tags.extend(options.tags.iter().map(|(name, value)| Label::new(name, value)));

        Ok(NodeInput {
            collectors,
            system: Mutex::new(system),
            tags,
        })
    }

    #[must_use]
    pub fn collectors(&self) -> &[NodeCollector] {
        &self.collectors
    }
}

#[async_trait]
impl Source for NodeInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Collector
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let mut system = self.system.lock().await;
        let mut families = Vec::new();
        for collector in &self.collectors {
            match collector {
                NodeCollector::Cpu => cpu(&mut system, &mut families),
                NodeCollector::Memory => memory(&mut system, &mut families),
                NodeCollector::Load => load(&mut families),
                NodeCollector::Filesystem => filesystem(&mut families),
            }
        }
        Ok(families)
    }

    fn tags(&self) -> Vec<Label> {
        self.tags.clone()
    }

    fn description(&self) -> &str {
        "Reads host cpu, memory, load and filesystem usage"
    }
}

fn gauge(name: &str, help: &str, value: f64) -> MetricFamily {
    MetricFamily::new(name, MetricType::Gauge)
        .with_help(help)
        .with_sample(MetricSample::gauge(value))
}

fn cpu(system: &mut System, families: &mut Vec<MetricFamily>) {
    system.refresh_cpu_all();
    let mut usage = gauge(
        "node_cpu_usage_percent",
        "CPU usage in percent, overall and per core.",
        f64::from(system.global_cpu_usage()),
    );
    for (core, cpu) in system.cpus().iter().enumerate() {
        usage.push_sample(
            MetricSample::gauge(f64::from(cpu.cpu_usage())).with_label("core", core.to_string()),
        );
    }
    families.push(usage);
}

fn memory(system: &mut System, families: &mut Vec<MetricFamily>) {
    system.refresh_memory();
    let stats = [
        ("node_memory_MemTotal_bytes", "Total memory in bytes.", system.total_memory()),
        ("node_memory_MemUsed_bytes", "Used memory in bytes.", system.used_memory()),
        (
            "node_memory_MemAvailable_bytes",
            "Memory available for new allocations in bytes.",
            system.available_memory(),
        ),
        ("node_memory_SwapTotal_bytes", "Total swap in bytes.", system.total_swap()),
        ("node_memory_SwapUsed_bytes", "Used swap in bytes.", system.used_swap()),
    ];
    for (name, help, value) in stats {
        families.push(gauge(name, help, value as f64));
    }
}

fn load(families: &mut Vec<MetricFamily>) {
    let average = System::load_average();
    families.push(gauge("node_load1", "1m load average.", average.one));
    families.push(gauge("node_load5", "5m load average.", average.five));
    families.push(gauge("node_load15", "15m load average.", average.fifteen));
    families.push(gauge(
        "node_uptime_seconds",
        "Seconds since boot.",
        System::uptime() as f64,
    ));
}

fn filesystem(families: &mut Vec<MetricFamily>) {
    let mut size = MetricFamily::new("node_filesystem_size_bytes", MetricType::Gauge)
        .with_help("Filesystem size in bytes.");
    let mut avail = MetricFamily::new("node_filesystem_avail_bytes", MetricType::Gauge)
        .with_help("Filesystem space available to non-root users in bytes.");
    for disk in Disks::new_with_refreshed_list().list() {
        let mountpoint = disk.mount_point().to_string_lossy().to_string();
        size.push_sample(
            MetricSample::gauge(disk.total_space() as f64).with_label("mountpoint", &mountpoint),
        );
        avail.push_sample(
            MetricSample::gauge(disk.available_space() as f64).with_label("mountpoint", mountpoint),
        );
    }
    families.extend([size, avail].into_iter().filter(|f| !f.samples.is_empty()));
}
