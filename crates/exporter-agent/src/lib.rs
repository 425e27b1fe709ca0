// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Orchestration engine for pull-and-push metric exporters.
//!
//! Every configured [`input::Source`] is polled on its own timer. Gathered
//! families travel over a bounded fan-in channel into a [`buffer::BoundedBuffer`],
//! and a single [`flusher::Flusher`] periodically drains that buffer in batches,
//! merges same-named families, stamps the global tags and hands the result to
//! the configured [`output::Destination`].
//!
//! The [`agent::Agent`] wires these pieces together from a [`config::Config`]
//! and a [`registry::Registry`] of adapter factories.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod buffer;
pub mod config;
pub mod errors;
pub mod fan_in;
pub mod flusher;
pub mod input;
pub mod metric;
pub mod output;
pub mod registry;
