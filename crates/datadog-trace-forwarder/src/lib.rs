// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Queued, retrying, optionally crash-durable forwarding of trace spans
//! from a local collection agent to a downstream collector tier.
//!
//! Ingestion hands batches to [`QueuedReporter::emit_batch`], which enqueues
//! them on one of three interchangeable strategies (bounded in-memory,
//! direct pass-through, or disk-persisted) and returns immediately.
//! Background workers deliver each batch through the [`Forwarder`] trait,
//! retrying transient failures with one backoff cadence shared by all
//! workers and dropping terminal failures after counting them. The
//! persistent strategy keeps unacknowledged batches on disk so an agent
//! restart redelivers them (at-least-once; duplicates are possible after a
//! crash).

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod reporter;
pub mod retry;

mod backoff;

pub use config::{Config, QueueKind, StorageConfig};
pub use error::{ErrorKind, ForwardError, QueueError, ReporterError, StorageError};
pub use model::{Batch, KeyValue, Process, Span};
pub use reporter::{Forwarder, QueuedReporter};
