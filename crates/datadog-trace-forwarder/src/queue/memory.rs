// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory queue drained by a fixed worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BatchProcessor, SpanQueue};
use crate::error::QueueError;
use crate::metrics::{Counter, Gauge, MetricsSink};
use crate::model::Batch;

const DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed-capacity buffer with graceful-drop backpressure.
///
/// `enqueue` never blocks: when the buffer is full the batch is dropped,
/// counted, and an error is returned to the producer. Workers invoke the
/// processing callback, whose retry loop can run for a long time; during a
/// sustained outage a small pool drains slowly instead of growing memory.
pub struct BoundedMemoryQueue {
    tx: mpsc::Sender<Batch>,
    depth: Arc<AtomicUsize>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BoundedMemoryQueue {
    /// Starts the worker pool and the depth reporter. Must be called from
    /// within a tokio runtime.
    pub fn start(
        capacity: usize,
        workers: usize,
        processor: Arc<dyn BatchProcessor>,
        metrics: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Batch>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let depth = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::with_capacity(workers + 1);
        for _ in 0..workers {
            let rx = Arc::clone(&rx);
            let depth = Arc::clone(&depth);
            let processor = Arc::clone(&processor);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = async {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        } => received,
                    };
                    match received {
                        Some(batch) => {
                            depth.fetch_sub(1, Ordering::SeqCst);
                            // The callback resolves the batch either way;
                            // nothing is redelivered from a memory buffer.
                            let _ = processor.process(batch).await;
                        }
                        None => break,
                    }
                }
            }));
        }

        {
            let depth = Arc::clone(&depth);
            let metrics = Arc::clone(&metrics);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(DEPTH_REPORT_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            metrics.record(Gauge::QueueDepth, depth.load(Ordering::SeqCst) as u64);
                        }
                    }
                }
            }));
        }

        BoundedMemoryQueue {
            tx,
            depth,
            metrics,
            cancel,
            tasks: tokio::sync::Mutex::new(tasks),
        }
    }

    /// Number of batches currently buffered (excluding any batch a worker is
    /// processing).
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SpanQueue for BoundedMemoryQueue {
    async fn enqueue(&self, batch: Batch) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Closed);
        }
        // Counted before the push so the depth never underflows when a
        // worker picks the batch up immediately.
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                self.metrics.incr(Counter::BatchesDropped, 1);
                Err(QueueError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Err(QueueError::Closed)
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        debug!("bounded memory queue stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::Semaphore;
    use tokio::time::{sleep, Duration};

    use super::*;
    use crate::metrics::RecordingSink;
    use crate::model::{Process, Span};
    use crate::queue::ProcessOutcome;

    /// Processor that signals entry and then waits for a release permit.
    struct GatedProcessor {
        entered_tx: mpsc::UnboundedSender<()>,
        release: Arc<Semaphore>,
        processed: Mutex<Vec<String>>,
    }

    impl GatedProcessor {
        fn new(release: Arc<Semaphore>) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
            let (entered_tx, entered_rx) = mpsc::unbounded_channel();
            (
                Arc::new(GatedProcessor {
                    entered_tx,
                    release,
                    processed: Mutex::new(Vec::new()),
                }),
                entered_rx,
            )
        }

        fn processed(&self) -> Vec<String> {
            self.processed.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl BatchProcessor for GatedProcessor {
        async fn process(&self, batch: Batch) -> ProcessOutcome {
            let _ = self.entered_tx.send(());
            let permit = self.release.acquire().await.expect("semaphore closed");
            permit.forget();
            self.processed
                .lock()
                .expect("lock poisoned")
                .push(batch.process.service_name.clone());
            ProcessOutcome::Completed
        }
    }

    fn batch(name: &str) -> Batch {
        Batch::new(Process::new(name), vec![Span::new(1, 1, "op")])
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_full_queue_drops_batch_and_counts_it() {
        let release = Arc::new(Semaphore::new(0));
        let (processor, mut entered_rx) = GatedProcessor::new(Arc::clone(&release));
        let metrics = Arc::new(RecordingSink::new());

        let queue = BoundedMemoryQueue::start(
            1,
            1,
            Arc::clone(&processor) as Arc<dyn BatchProcessor>,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            CancellationToken::new(),
        );

        // First batch is picked up by the only worker, which then blocks.
        queue.enqueue(batch("success_0")).await.expect("enqueue");
        entered_rx.recv().await.expect("worker entered");

        // Second batch occupies the single buffer slot.
        queue.enqueue(batch("success_1")).await.expect("enqueue");
        wait_until(|| queue.len() == 1).await;

        // Third batch has nowhere to go.
        assert!(matches!(
            queue.enqueue(batch("error_0")).await,
            Err(QueueError::Full)
        ));
        assert_eq!(metrics.counter(Counter::BatchesDropped), 1);
        assert!(queue.len() <= 1);

        release.add_permits(2);
        wait_until(|| processor.processed().len() == 2).await;
        assert_eq!(processor.processed(), vec!["success_0", "success_1"]);

        queue.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_each_batch_is_processed_exactly_once() {
        let release = Arc::new(Semaphore::new(100));
        let (processor, _entered_rx) = GatedProcessor::new(Arc::clone(&release));

        let queue = BoundedMemoryQueue::start(
            10,
            2,
            Arc::clone(&processor) as Arc<dyn BatchProcessor>,
            Arc::new(RecordingSink::new()) as Arc<dyn MetricsSink>,
            CancellationToken::new(),
        );

        for i in 0..5 {
            queue.enqueue(batch(&format!("svc-{i}"))).await.expect("enqueue");
        }

        wait_until(|| processor.processed().len() == 5).await;
        let mut processed = processor.processed();
        processed.sort();
        assert_eq!(processed, vec!["svc-0", "svc-1", "svc-2", "svc-3", "svc-4"]);

        queue.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_rejected() {
        let release = Arc::new(Semaphore::new(100));
        let (processor, _entered_rx) = GatedProcessor::new(release);

        let queue = BoundedMemoryQueue::start(
            4,
            1,
            processor as Arc<dyn BatchProcessor>,
            Arc::new(RecordingSink::new()) as Arc<dyn MetricsSink>,
            CancellationToken::new(),
        );

        queue.close().await.expect("close");
        assert!(matches!(
            queue.enqueue(batch("late")).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_depth_gauge_is_reported() {
        let release = Arc::new(Semaphore::new(0));
        let (processor, mut entered_rx) = GatedProcessor::new(Arc::clone(&release));
        let metrics = Arc::new(RecordingSink::new());

        let queue = BoundedMemoryQueue::start(
            4,
            1,
            processor as Arc<dyn BatchProcessor>,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            CancellationToken::new(),
        );

        queue.enqueue(batch("a")).await.expect("enqueue");
        entered_rx.recv().await.expect("worker entered");
        queue.enqueue(batch("b")).await.expect("enqueue");

        wait_until(|| metrics.gauge(Gauge::QueueDepth) == Some(1)).await;

        release.add_permits(2);
        queue.close().await.expect("close");
    }
}
