// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Queued reporter: accepts batches from the ingestion path, queues them,
//! and drives the retrying delivery pipeline around the downstream
//! transport.
//!
//! # Architecture
//!
//! ```text
//!   ingestion ──> emit_batch ──> queue (direct | memory | persistent)
//!                                   │ worker(s)
//!                                   v
//!                             ForwardPipeline ──> Forwarder::forward_batch
//!                                   │ retryable failure
//!                                   v
//!                             shared backoff sleep, retry until success
//!                             or close; terminal failures are dropped
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::backoff::SharedBackoff;
use crate::config::{Config, QueueKind};
use crate::error::{ForwardError, QueueError, ReporterError};
use crate::metrics::{Counter, Gauge, MetricsSink};
use crate::model::{Batch, KeyValue};
use crate::queue::{
    BatchProcessor, BoundedMemoryQueue, DirectQueue, PersistentQueue, ProcessOutcome, SpanQueue,
};
use crate::retry::RetryClassifier;

/// Downstream transport client performing the actual delivery to the
/// collector tier.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward_batch(&self, batch: &Batch) -> Result<(), ForwardError>;
}

/// Reporter that queues every incoming batch and lets a background pipeline
/// push it downstream.
///
/// The ingestion path is shielded from transient downstream failures: every
/// retryable error is absorbed by the pipeline's retry loop, and the only
/// errors `emit_batch` surfaces are queue-level rejections.
pub struct QueuedReporter {
    queue: Arc<dyn SpanQueue>,
    agent_tags: Vec<KeyValue>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl QueuedReporter {
    /// Builds the reporter and starts the configured queue strategy. A
    /// storage failure while opening the persistent queue is fatal here.
    pub async fn new(
        config: Config,
        forwarder: Arc<dyn Forwarder>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<QueuedReporter, ReporterError> {
        let config = config.normalized();
        let cancel = CancellationToken::new();

        let pipeline = Arc::new(ForwardPipeline {
            forwarder,
            classifier: RetryClassifier::new(config.retry_unknown),
            backoff: SharedBackoff::new(
                config.initial_retry_interval,
                config.max_retry_interval,
                Arc::clone(&metrics),
            ),
            metrics: Arc::clone(&metrics),
            cancel: cancel.clone(),
        });

        let queue: Arc<dyn SpanQueue> = match config.queue_kind {
            QueueKind::Direct => Arc::new(DirectQueue::new(pipeline)),
            QueueKind::Memory => Arc::new(BoundedMemoryQueue::start(
                config.queue_capacity,
                config.worker_concurrency,
                pipeline,
                Arc::clone(&metrics),
                cancel.child_token(),
            )),
            QueueKind::Persistent => {
                let storage = config
                    .storage
                    .as_ref()
                    .ok_or(ReporterError::MissingStorageDirectory)?;
                Arc::new(
                    PersistentQueue::start(
                        storage,
                        config.worker_concurrency,
                        pipeline,
                        Arc::clone(&metrics),
                        cancel.child_token(),
                    )
                    .await?,
                )
            }
        };

        Ok(QueuedReporter {
            queue,
            agent_tags: config.agent_tags,
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    /// Hands a batch to the active queue, stamping configured agent tags
    /// onto its process first. Returns immediately; only a queue-level
    /// rejection surfaces here, never a downstream transport failure.
    pub async fn emit_batch(&self, mut batch: Batch) -> Result<(), QueueError> {
        if batch.spans.is_empty() {
            return Ok(());
        }
        if !self.agent_tags.is_empty() {
            batch.process.merge_tags(&self.agent_tags);
        }
        self.queue.enqueue(batch).await
    }

    /// Stops retry loops at their next check point and shuts the queue
    /// down. An in-flight forward attempt is not interrupted, so this can
    /// take as long as one attempt. Safe to call more than once.
    pub async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        self.queue.close().await
    }
}

/// Processing callback shared by every queue worker: forwards one batch,
/// retrying transient failures until success or shutdown.
struct ForwardPipeline {
    forwarder: Arc<dyn Forwarder>,
    classifier: RetryClassifier,
    backoff: SharedBackoff,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl ForwardPipeline {
    fn record_success(&self, span_count: u64) {
        self.metrics.incr(Counter::BatchesSubmitted, 1);
        self.metrics.incr(Counter::SpansSubmitted, span_count);
        self.metrics.record(Gauge::BatchSpanCount, span_count);
    }
}

#[async_trait]
impl BatchProcessor for ForwardPipeline {
    async fn process(&self, batch: Batch) -> ProcessOutcome {
        let span_count = batch.spans.len() as u64;

        let mut err = match self.forwarder.forward_batch(&batch).await {
            Ok(()) => {
                self.record_success(span_count);
                return ProcessOutcome::Completed;
            }
            Err(err) => err,
        };

        while self.classifier.is_retryable(&err) {
            if self.cancel.is_cancelled() {
                return ProcessOutcome::Interrupted;
            }
            self.metrics.incr(Counter::BatchesRetried, 1);
            let wait = self.backoff.next_interval();
            warn!(
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "failed to contact the collector, waiting before retry"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return ProcessOutcome::Interrupted,
                _ = tokio::time::sleep(wait) => {}
            }
            match self.forwarder.forward_batch(&batch).await {
                Ok(()) => {
                    self.backoff.reset();
                    self.record_success(span_count);
                    return ProcessOutcome::Completed;
                }
                Err(next) => err = next,
            }
        }

        self.metrics.incr(Counter::BatchesFailed, 1);
        self.metrics.incr(Counter::SpansFailed, span_count);
        error!(error = %err, "could not send batch, dropping it");
        ProcessOutcome::Dropped(err)
    }
}
