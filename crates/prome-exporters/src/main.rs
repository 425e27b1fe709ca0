// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod args;
mod server;

use std::env;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use exporter_agent::agent::Agent;
use exporter_agent::config::{CommandType, Config};
use exporter_agent::registry::Registry;

use crate::args::Args;

const EXIT_CONFIG: u8 = 1;
const EXIT_AGENT: u8 = 2;
const EXIT_RUN: u8 = 3;

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_CONFIG } else { 0 };
            if let Err(e) = e.print() {
                eprintln!("{e}");
            }
            return ExitCode::from(code);
        }
    };
    if args.list {
        return match default_registry() {
            Ok(registry) => {
                print!("{}", describe(&registry));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(EXIT_AGENT)
            }
        };
    }

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let log_level = env::var("EXPORTER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| config.exporter.log_level.as_ref().to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("{e}");
        return ExitCode::from(EXIT_CONFIG);
    }
    debug!("Logging subsystem enabled");

    let registry = match default_registry() {
        Ok(registry) => registry,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_AGENT);
        }
    };

    let command_type = config.exporter.command_type;
    let listen_address = config.exporter.listen_address.clone();
    let metrics_path = config.exporter.metrics_path.clone();

    let mut agent = match Agent::new(config, &registry) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to create agent: {e}");
            return ExitCode::from(EXIT_AGENT);
        }
    };
    if let Err(e) = agent.run().await {
        error!("Failed to run agent: {e}");
        if let Err(e) = agent.stop().await {
            debug!("Stop after failed run: {e}");
        }
        return ExitCode::from(EXIT_RUN);
    }

    let shutdown = CancellationToken::new();
    let server_task = if command_type == CommandType::Server {
        let listener = match TcpListener::bind(&listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {listen_address}: {e}");
                if let Err(e) = agent.stop().await {
                    error!("Failed to stop agent: {e}");
                }
                return ExitCode::from(EXIT_RUN);
            }
        };
        info!("Serving process metrics on http://{listen_address}{metrics_path}");
        Some(tokio::spawn(server::serve(
            listener,
            metrics_path,
            shutdown.clone(),
        )))
    } else {
        None
    };

    wait_for_signal().await;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Some(task) = server_task {
        match task.await {
            Ok(Err(e)) => error!("Metrics server failed: {e}"),
            Err(e) => error!("Metrics server task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = agent.stop().await {
        error!("Failed to stop agent: {e}");
    }
    ExitCode::SUCCESS
}

fn init_logging(log_level: &str) -> Result<(), String> {
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");
    let filter = EnvFilter::try_new(env_filter)
        .map_err(|e| format!("could not parse log level {log_level:?}: {e}"))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_target(true)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("setting default subscriber failed: {e}"))
}

fn default_registry() -> Result<Registry, String> {
    let mut registry = Registry::new();
    exporter_plugins::register_defaults(&mut registry)
        .map_err(|e| format!("Failed to register built-in adapters: {e}"))?;
    Ok(registry)
}

fn describe(registry: &Registry) -> String {
    let mut out = String::from("Inputs:\n");
    for name in registry.input_names() {
        match registry.input_kind(name) {
            Some(kind) => out.push_str(&format!("  {name} ({kind})\n")),
            None => out.push_str(&format!("  {name}\n")),
        }
    }
    out.push_str("Outputs:\n");
    for name in registry.output_names() {
        out.push_str(&format!("  {name}\n"));
    }
    out.push_str("Serializers:\n");
    for name in registry.serializer_names() {
        out.push_str(&format!("  {name}\n"));
    }
    out
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for ctrl-c: {e}");
                }
            }
        }
    }
    #[cfg(not(unix))]
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
    }
}
