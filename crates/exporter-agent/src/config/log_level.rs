// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Log level accepted in the `exporter.log_level` setting.
//!
//! Parsing is case-insensitive. Deserialization never fails: an unknown
//! value is logged and replaced by the default, so a typo in the level does
//! not keep the exporter from starting.

use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = value {
            match LogLevel::from_str(&s) {
                Ok(level) => Ok(level),
                Err(e) => {
                    error!("{e}, using default");
                    Ok(LogLevel::default())
                }
            }
        } else {
            error!("Expected a string for log_level, got {value}, using default");
            Ok(LogLevel::default())
        }
    }
}
