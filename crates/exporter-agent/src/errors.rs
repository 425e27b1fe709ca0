// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use crate::input::SourceKind;

/// Errors raised while loading, validating or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported input: {0}")]
    UnknownInput(String),

    #[error("Unsupported output: {0}")]
    UnknownOutput(String),

    #[error("Unsupported serializer: {0}")]
    UnknownSerializer(String),

    #[error("Input {name} was registered as {declared} but built a {built}")]
    KindMismatch {
        name: String,
        declared: SourceKind,
        built: SourceKind,
    },

    #[error("Invalid options for {name}: {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// The three adapter tables held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Input,
    Output,
    Serializer,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Input => f.write_str("input"),
            AdapterKind::Output => f.write_str("output"),
            AdapterKind::Serializer => f.write_str("serializer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Cannot register {kind} with an empty name")]
    EmptyName { kind: AdapterKind },

    #[error("The {kind} {name} is already registered")]
    Duplicate { kind: AdapterKind, name: String },
}

/// Failure of one gather call of one source.
#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error("Request to [{url}] failed: {reason}")]
    Request { url: String, reason: String },

    #[error("When reading from [{url}] received status code: {status}. body: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse payload: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported on this platform: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("Failed to encode family {family}: {reason}")]
    Encode { family: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of a destination call.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Request to [{url}] failed: {reason}")]
    Request { url: String, reason: String },

    #[error("When writing to [{url}] received status code: {status}. body: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Destination is not connected")]
    NotConnected,

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by the agent lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Initial gather of input {input} failed: {source}")]
    InitialGather {
        input: String,
        #[source]
        source: GatherError,
    },

    #[error("Failed to connect output {output}: {source}")]
    Connect {
        output: String,
        #[source]
        source: WriteError,
    },

    #[error("Agent already started")]
    AlreadyStarted,

    #[error("Agent not running")]
    NotRunning,

    #[error("Agent task failed: {0}")]
    Task(String),
}
