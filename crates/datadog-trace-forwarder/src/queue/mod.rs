// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Queue strategies that decouple span ingestion from forwarding.
//!
//! All strategies share one contract: accept a batch quickly, hand it to the
//! processing callback on a background worker, and report the outcome. The
//! callback owns whatever retry policy runs around the actual delivery.

mod direct;
mod memory;
mod persistent;

pub use direct::DirectQueue;
pub use memory::BoundedMemoryQueue;
pub use persistent::PersistentQueue;

use async_trait::async_trait;

use crate::error::{ForwardError, QueueError};
use crate::model::Batch;

/// Result of handing a batch to the processing callback.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The batch was delivered downstream.
    Completed,
    /// The batch failed terminally and was dropped; the error is kept for
    /// observability only.
    Dropped(ForwardError),
    /// Shutdown was observed mid-retry; the batch is unresolved and a
    /// durable queue must redeliver it.
    Interrupted,
}

impl ProcessOutcome {
    /// Whether the queue should consider the batch fully resolved.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ProcessOutcome::Interrupted)
    }
}

/// Callback that delivers one batch, owning any retry policy around it.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, batch: Batch) -> ProcessOutcome;
}

#[async_trait]
pub trait SpanQueue: Send + Sync {
    /// Hands a batch to the queue. Must return without waiting on network
    /// I/O.
    async fn enqueue(&self, batch: Batch) -> Result<(), QueueError>;

    /// Stops background work and releases resources.
    async fn close(&self) -> Result<(), QueueError>;
}
