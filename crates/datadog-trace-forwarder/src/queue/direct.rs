// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synchronous pass-through queue with no buffering.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BatchProcessor, ProcessOutcome, SpanQueue};
use crate::error::QueueError;
use crate::model::Batch;

/// Queue strategy that invokes the processing callback inline.
///
/// There is no buffering and no concurrency: the caller of `enqueue` blocks
/// for the whole processing duration, including any retry loop, and sees the
/// terminal result directly. Meant for tests and zero-indirection setups.
pub struct DirectQueue {
    processor: Arc<dyn BatchProcessor>,
}

impl DirectQueue {
    pub fn new(processor: Arc<dyn BatchProcessor>) -> Self {
        DirectQueue { processor }
    }
}

#[async_trait]
impl SpanQueue for DirectQueue {
    async fn enqueue(&self, batch: Batch) -> Result<(), QueueError> {
        match self.processor.process(batch).await {
            ProcessOutcome::Completed => Ok(()),
            ProcessOutcome::Dropped(err) => Err(QueueError::Forward(err)),
            ProcessOutcome::Interrupted => Err(QueueError::Closed),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
