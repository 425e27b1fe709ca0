// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Name-keyed adapter factories.
//!
//! The registry is an ordinary value: build one, register the adapters you
//! want and hand it to [`crate::agent::Agent::new`]. Every input is registered
//! together with the [`SourceKind`] it promises to produce, and a built source
//! that does not honour that promise is rejected.

use std::collections::BTreeMap;

use crate::config::{InputConfig, OutputConfig};
use crate::errors::{AdapterKind, ConfigError, RegistryError};
use crate::input::{Source, SourceKind};
use crate::output::{Destination, Serializer};

pub type InputFactory =
    Box<dyn Fn(&InputConfig) -> Result<Box<dyn Source>, ConfigError> + Send + Sync>;
pub type OutputFactory =
    Box<dyn Fn(&OutputConfig, &Registry) -> Result<Box<dyn Destination>, ConfigError> + Send + Sync>;
pub type SerializerFactory = Box<dyn Fn() -> Box<dyn Serializer> + Send + Sync>;

struct InputEntry {
    kind: SourceKind,
    factory: InputFactory,
}

#[derive(Default)]
pub struct Registry {
    inputs: BTreeMap<String, InputEntry>,
    outputs: BTreeMap<String, OutputFactory>,
    serializers: BTreeMap<String, SerializerFactory>,
}

fn check_name<T>(
    table: &BTreeMap<String, T>,
    kind: AdapterKind,
    name: &str,
) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName { kind });
    }
    if table.contains_key(name) {
        return Err(RegistryError::Duplicate {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register_input<F>(
        &mut self,
        name: &str,
        kind: SourceKind,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&InputConfig) -> Result<Box<dyn Source>, ConfigError> + Send + Sync + 'static,
    {
        check_name(&self.inputs, AdapterKind::Input, name)?;
        self.inputs.insert(
            name.to_string(),
            InputEntry {
                kind,
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    pub fn register_output<F>(&mut self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&OutputConfig, &Registry) -> Result<Box<dyn Destination>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        check_name(&self.outputs, AdapterKind::Output, name)?;
        self.outputs.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn register_serializer<F>(&mut self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Serializer> + Send + Sync + 'static,
    {
        check_name(&self.serializers, AdapterKind::Serializer, name)?;
        self.serializers.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn build_input(&self, config: &InputConfig) -> Result<Box<dyn Source>, ConfigError> {
        let entry = self
            .inputs
            .get(&config.name)
            .ok_or_else(|| ConfigError::UnknownInput(config.name.clone()))?;
        let source = (entry.factory)(config)?;
        if source.kind() != entry.kind {
            return Err(ConfigError::KindMismatch {
                name: config.name.clone(),
                declared: entry.kind,
                built: source.kind(),
            });
        }
        Ok(source)
    }

    pub fn build_output(&self, config: &OutputConfig) -> Result<Box<dyn Destination>, ConfigError> {
        let factory = self
            .outputs
            .get(&config.name)
            .ok_or_else(|| ConfigError::UnknownOutput(config.name.clone()))?;
        factory(config, self)
    }

    pub fn build_serializer(&self, name: &str) -> Result<Box<dyn Serializer>, ConfigError> {
        let factory = self
            .serializers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSerializer(name.to_string()))?;
        Ok(factory())
    }

    #[must_use]
    pub fn input_kind(&self, name: &str) -> Option<SourceKind> {
        self.inputs.get(name).map(|entry| entry.kind)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn serializer_names(&self) -> impl Iterator<Item = &str> {
        self.serializers.keys().map(String::as_str)
    }
}
