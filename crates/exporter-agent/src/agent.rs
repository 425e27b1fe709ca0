// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle.
//!
//! The agent owns the bounded buffer, the fan-in channel and every running
//! input and output. [`Agent::run`] starts the fan-in collector, then every
//! input scheduler, then connects the output and starts the flusher, in that
//! order. [`Agent::stop`] signals the inputs first, then the fan-in collector,
//! then the flusher, which closes the destination on its way out.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::buffer::BoundedBuffer;
use crate::config::{Config, ExporterConfig};
use crate::errors::{AgentError, ConfigError};
use crate::fan_in::FanInCollector;
use crate::flusher::{Flusher, FlusherConfig};
use crate::input::RunningInput;
use crate::output::RunningOutput;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentState {
    Created,
    Running,
    Stopped,
}

pub struct Agent {
    exporter: ExporterConfig,
    buffer: Arc<BoundedBuffer>,
    inputs: Vec<RunningInput>,
    output: Option<RunningOutput>,
    collector_stop: CancellationToken,
    output_stop: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    output_task: Option<JoinHandle<()>>,
    state: AgentState,
}

impl Agent {
    /// Normalizes and validates `config`, then builds every input and the
    /// output through `registry`. Nothing is started yet.
    pub fn new(config: Config, registry: &Registry) -> Result<Self, ConfigError> {
        let config = config.normalize();
        config.validate()?;

        let mut inputs = Vec::with_capacity(config.inputs.len());
        for input_config in &config.inputs {
            let source = registry.build_input(input_config)?;
            debug!(
                input = %input_config.name,
                kind = %source.kind(),
                interval = ?input_config.interval(),
                "Built input"
            );
            inputs.push(RunningInput::new(
                input_config.name.clone(),
                input_config.interval(),
                input_config.tag_labels(),
                source,
            ));
        }

        let destination = registry.build_output(&config.output)?;
        let output = RunningOutput::new(
            config.output.name.clone(),
            config.exporter.flush_interval(),
            destination,
        );

        Ok(Agent::with_components(config.exporter, inputs, output))
    }

    /// Assembles an agent from already built parts.
    #[must_use]
    pub fn with_components(
        exporter: ExporterConfig,
        inputs: Vec<RunningInput>,
        output: RunningOutput,
    ) -> Self {
        Agent {
            buffer: Arc::new(BoundedBuffer::new(exporter.metric_buffer_limit)),
            exporter,
            inputs,
            output: Some(output),
            collector_stop: CancellationToken::new(),
            output_stop: CancellationToken::new(),
            task_handles: Vec::new(),
            output_task: None,
            state: AgentState::Created,
        }
    }

    /// Starts every loop. The initial gather of each input runs here, so a
    /// source that cannot be reached at startup fails the whole run. Nothing
    /// already started is torn down on failure; call [`Agent::stop`] for that.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        if self.state != AgentState::Created {
            return Err(AgentError::AlreadyStarted);
        }
        self.state = AgentState::Running;

        let (tx, rx) = mpsc::channel(self.inputs.len().max(1));

        let collector = FanInCollector::new(
            rx,
            Arc::clone(&self.buffer),
            self.exporter.metric_buffer_limit,
        );
        self.task_handles
            .push(tokio::spawn(collector.run(self.collector_stop.clone())));

        for input in &self.inputs {
            let initial = input
                .gather()
                .await
                .map_err(|source| AgentError::InitialGather {
                    input: input.name().to_string(),
                    source,
                })?;
            debug!(input = %input.name(), families = initial.len(), "Initial gather succeeded");
            self.task_handles.push(input.spawn(tx.clone(), initial));
        }
        drop(tx);

        let mut output = self.output.take().ok_or(AgentError::AlreadyStarted)?;
        output
            .connect()
            .await
            .map_err(|source| AgentError::Connect {
                output: output.name().to_string(),
                source,
            })?;

        let span = info_span!("output", output = %output.name());
        let flusher = Flusher::new(
            output,
            FlusherConfig {
                buffer: Arc::clone(&self.buffer),
                batch_size: self.exporter.metric_batch_size,
                global_tags: self.exporter.global_tag_labels(),
                legacy_batch_decrement: self.exporter.legacy_batch_decrement,
            },
        );
        self.output_task = Some(tokio::spawn(
            flusher.run(self.output_stop.clone()).instrument(span),
        ));

        info!(
            inputs = self.inputs.len(),
            buffer_limit = self.exporter.metric_buffer_limit,
            batch_size = self.exporter.metric_batch_size,
            "Agent started"
        );
        Ok(())
    }

    /// Stops inputs, then the fan-in collector, then the output, and waits for
    /// the output to close. Close failures are logged by the flusher and do
    /// not fail the stop.
    pub async fn stop(&mut self) -> Result<(), AgentError> {
        if self.state != AgentState::Running {
            return Err(AgentError::NotRunning);
        }
        self.state = AgentState::Stopped;

        for input in &self.inputs {
            input.stop().await;
        }
        self.collector_stop.cancel();
        self.output_stop.cancel();

        let result = match self.output_task.take() {
            Some(task) => task.await.map_err(|e| {
                error!("Flusher task failed: {e}");
                AgentError::Task(e.to_string())
            }),
            None => Ok(()),
        };
        // Input loops may be blocked in a gather that never returns; they are not awaited.
        self.task_handles.clear();

        info!("Agent stopped");
        result
    }

    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn inputs(&self) -> &[RunningInput] {
        &self.inputs
    }

    #[must_use]
    pub fn exporter_config(&self) -> &ExporterConfig {
        &self.exporter
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, OutputConfig};
    use crate::errors::{GatherError, WriteError};
    use crate::input::{Source, SourceKind};
    use crate::metric::{MetricFamily, MetricSample, MetricType};
    use crate::output::Destination;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Static {
        fail: bool,
    }

    #[async_trait]
    impl Source for Static {
        fn kind(&self) -> SourceKind {
            SourceKind::Gatherer
        }

        async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
            if self.fail {
                return Err(GatherError::Request {
                    url: "http://127.0.0.1:1/metrics".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(vec![MetricFamily::new("up", MetricType::Gauge)
                .with_sample(MetricSample::gauge(1.0))])
        }
    }

    struct Sink {
        refuse_connect: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Destination for Sink {
        async fn connect(&mut self) -> Result<(), WriteError> {
            if self.refuse_connect {
                return Err(WriteError::Connect("unsupported method".to_string()));
            }
            Ok(())
        }

        async fn write(&mut self, _: &[MetricFamily]) -> Result<(), WriteError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), WriteError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn agent(fail_gather: bool, refuse_connect: bool, closed: &Arc<AtomicBool>) -> Agent {
        let input = RunningInput::new(
            "static",
            Duration::from_secs(1),
            Vec::new(),
            Box::new(Static { fail: fail_gather }),
        );
        let output = RunningOutput::new(
            "sink",
            Duration::from_secs(1),
            Box::new(Sink {
                refuse_connect,
                closed: Arc::clone(closed),
            }),
        );
        Agent::with_components(ExporterConfig::default(), vec![input], output)
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_input("static", SourceKind::Gatherer, |_| Ok(Box::new(Static { fail: false })))
            .unwrap();
        registry
            .register_output("sink", |_, _| {
                Ok(Box::new(Sink {
                    refuse_connect: false,
                    closed: Arc::new(AtomicBool::new(false)),
                }))
            })
            .unwrap();
        registry
    }

    #[test]
    fn new_rejects_unknown_adapters() {
        let config = Config {
            inputs: vec![InputConfig {
                name: "snmp".to_string(),
                ..InputConfig::default()
            }],
            output: OutputConfig {
                name: "sink".to_string(),
                ..OutputConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            Agent::new(config, &registry()),
            Err(ConfigError::UnknownInput(_))
        ));
    }

    #[test]
    fn new_normalizes_configuration() {
        let mut config = Config {
            inputs: vec![InputConfig {
                name: "static".to_string(),
                interval: Some(Duration::from_millis(1)),
                ..InputConfig::default()
            }],
            output: OutputConfig {
                name: "sink".to_string(),
                ..OutputConfig::default()
            },
            ..Config::default()
        };
        config.exporter.metric_buffer_limit = 0;

        let agent = Agent::new(config, &registry()).unwrap();
        assert_eq!(agent.inputs()[0].interval(), Duration::from_secs(1));
        assert_eq!(agent.exporter_config().metric_buffer_limit, 10_000);
    }

    #[tokio::test]
    async fn run_fails_on_initial_gather_error() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut agent = agent(true, false, &closed);

        let err = agent.run().await.unwrap_err();
        assert!(matches!(err, AgentError::InitialGather { ref input, .. } if input == "static"));
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn run_fails_when_output_cannot_connect() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut agent = agent(false, true, &closed);

        let err = agent.run().await.unwrap_err();
        assert!(matches!(err, AgentError::Connect { ref output, .. } if output == "sink"));
    }

    #[tokio::test]
    async fn lifecycle_guards() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut agent = agent(false, false, &closed);

        assert!(matches!(agent.stop().await, Err(AgentError::NotRunning)));
        agent.run().await.unwrap();
        assert!(matches!(agent.run().await, Err(AgentError::AlreadyStarted)));

        agent.stop().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(agent.stop().await, Err(AgentError::NotRunning)));
    }
}
