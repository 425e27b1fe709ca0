// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Process metrics read from procfs.
//!
//! Only Linux has a procfs layout this module understands. Elsewhere every
//! gather fails with [`GatherError::Unsupported`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use exporter_agent::config::InputConfig;
use exporter_agent::errors::{ConfigError, GatherError};
use exporter_agent::input::{Source, SourceKind};
use exporter_agent::metric::{Label, MetricFamily, MetricSample, MetricType};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_PROC_PATH: &str = "/proc";

// Kernel clock ticks per second as exposed to user space.
const USER_HZ: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    pub proc_path: PathBuf,
    /// A pid, or `self` for the exporter itself.
    pub pid: String,
    pub tags: BTreeMap<String, String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        ProcessOptions {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            pid: "self".to_string(),
            tags: BTreeMap::new(),
        }
    }
}

/// Fields of `/proc/<pid>/stat` used here.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProcStat {
    utime: u64,
    stime: u64,
    num_threads: u64,
    start_ticks: u64,
}

pub struct ProcessInput {
    proc_path: PathBuf,
    pid: String,
    tags: Vec<Label>,
}

impl ProcessInput {
    pub fn new(config: &InputConfig) -> Result<Self, ConfigError> {
        let options: ProcessOptions = config.options()?;
        if options.pid.trim().is_empty() {
            return Err(ConfigError::InvalidOptions {
                name: config.name.clone(),
                reason: "pid must not be empty".to_string(),
            });
        }
        Ok(ProcessInput {
            proc_path: options.proc_path,
            pid: options.pid.trim().to_string(),
            tags: options
                .tags
                .iter()
                .map(|(name, value)| Label::new(name, value))
                .collect(),
        })
    }

    /// Reads the exporter's own process.
    #[must_use]
    pub fn current() -> Self {
        ProcessInput {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            pid: "self".to_string(),
            tags: Vec::new(),
        }
    }

    fn read(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let process_dir = self.proc_path.join(&self.pid);
        let stat = parse_stat(&fs::read_to_string(process_dir.join("stat"))?)?;

        let mut families = vec![MetricFamily::new("process_cpu_seconds_total", MetricType::Counter)
            .with_help("Total user and system CPU time spent in seconds.")
            .with_sample(MetricSample::counter(
                (stat.utime + stat.stime) as f64 / USER_HZ,
            ))];

        match fs::read_to_string(process_dir.join("status")) {
            Ok(status) => {
                if let Some(kb) = status_kb(&status, "VmRSS:") {
                    families.push(gauge(
                        "process_resident_memory_bytes",
                        "Resident memory size in bytes.",
                        kb * 1024.0,
                    ));
                }
                if let Some(kb) = status_kb(&status, "VmSize:") {
                    families.push(gauge(
                        "process_virtual_memory_bytes",
                        "Virtual memory size in bytes.",
                        kb * 1024.0,
                    ));
                }
            }
            Err(e) => debug!("Could not read {}: {e}", process_dir.join("status").display()),
        }

        match fs::read_dir(process_dir.join("fd")) {
            Ok(entries) => families.push(gauge(
                "process_open_fds",
                "Number of open file descriptors.",
                entries.count() as f64,
            )),
            Err(e) => debug!("Could not list {}: {e}", process_dir.join("fd").display()),
        }

        match fs::read_to_string(process_dir.join("limits")) {
            Ok(limits) => {
                if let Some(max) = max_open_files(&limits) {
                    families.push(gauge(
                        "process_max_fds",
                        "Maximum number of open file descriptors.",
                        max,
                    ));
                }
            }
            Err(e) => debug!("Could not read {}: {e}", process_dir.join("limits").display()),
        }

        match read_boot_time(&self.proc_path) {
            Some(boot_time) => families.push(gauge(
                "process_start_time_seconds",
                "Start time of the process since unix epoch in seconds.",
                boot_time + stat.start_ticks as f64 / USER_HZ,
            )),
            None => debug!("Could not read btime from {}", self.proc_path.join("stat").display()),
        }

        families.push(gauge(
            "process_threads",
            "Number of OS threads in the process.",
            stat.num_threads as f64,
        ));
        Ok(families)
    }
}

#[async_trait]
impl Source for ProcessInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Collector
    }

    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        if !cfg!(target_os = "linux") {
            return Err(GatherError::Unsupported(
                "process metrics require a Linux procfs",
            ));
        }
        self.read()
    }

    fn tags(&self) -> Vec<Label> {
        self.tags.clone()
    }

    fn description(&self) -> &str {
        "Reads cpu, memory, file descriptor and thread usage of a process"
    }
}

fn gauge(name: &str, help: &str, value: f64) -> MetricFamily {
    MetricFamily::new(name, MetricType::Gauge)
        .with_help(help)
        .with_sample(MetricSample::gauge(value))
}

/// The command name in field 2 may contain spaces and parentheses, so fields
/// are counted from the last `)`.
fn parse_stat(contents: &str) -> Result<ProcStat, GatherError> {
    let rest = contents
        .rfind(')')
        .map(|i| &contents[i + 1..])
        .ok_or_else(|| GatherError::Parse("malformed stat file".to_string()))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state) of proc(5).
    let field = |number: usize| -> Result<u64, GatherError> {
        fields
            .get(number - 3)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| GatherError::Parse(format!("stat field {number} is missing")))
    };
    Ok(ProcStat {
        utime: field(14)?,
        stime: field(15)?,
        num_threads: field(20)?,
        start_ticks: field(22)?,
    })
}

fn status_kb(status: &str, key: &str) -> Option<f64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse::<f64>().ok())
}

fn max_open_files(limits: &str) -> Option<f64> {
    limits
        .lines()
        .find_map(|line| line.strip_prefix("Max open files"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse::<f64>().ok())
}

fn read_boot_time(proc_path: &Path) -> Option<f64> {
    let stat = fs::read_to_string(proc_path.join("stat")).ok()?;
    stat.lines()
        .find_map(|line| line.strip_prefix("btime"))
        .and_then(|v| v.trim().parse::<f64>().ok())
}
