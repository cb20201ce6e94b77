// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of the downstream transport for testing

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use datadog_trace_forwarder::{Batch, ForwardError, Forwarder};

struct BlockGate {
    entered_tx: mpsc::UnboundedSender<()>,
    release: Arc<Semaphore>,
}

/// Forwarder whose failure behavior can be switched at runtime, in the
/// shape of the transport errors a collector connection produces.
#[allow(dead_code)]
pub struct MockForwarder {
    fail_retryable: AtomicBool,
    fail_terminal: AtomicBool,
    gate: Option<BlockGate>,
    retry_errors: AtomicU32,
    terminal_errors: AtomicU32,
    forwarded: Mutex<Vec<Batch>>,
}

#[allow(dead_code)]
impl MockForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(MockForwarder {
            fail_retryable: AtomicBool::new(false),
            fail_terminal: AtomicBool::new(false),
            gate: None,
            retry_errors: AtomicU32::new(0),
            terminal_errors: AtomicU32::new(0),
            forwarded: Mutex::new(Vec::new()),
        })
    }

    /// Variant that signals when a forward attempt starts and then blocks
    /// until a permit is added to the returned semaphore.
    pub fn blocking() -> (Arc<Self>, mpsc::UnboundedReceiver<()>, Arc<Semaphore>) {
        let (entered_tx, entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let forwarder = Arc::new(MockForwarder {
            fail_retryable: AtomicBool::new(false),
            fail_terminal: AtomicBool::new(false),
            gate: Some(BlockGate {
                entered_tx,
                release: Arc::clone(&release),
            }),
            retry_errors: AtomicU32::new(0),
            terminal_errors: AtomicU32::new(0),
            forwarded: Mutex::new(Vec::new()),
        });
        (forwarder, entered_rx, release)
    }

    pub fn set_fail_retryable(&self, fail: bool) {
        self.fail_retryable.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_terminal(&self, fail: bool) {
        self.fail_terminal.store(fail, Ordering::SeqCst);
    }

    pub fn retry_errors(&self) -> u32 {
        self.retry_errors.load(Ordering::SeqCst)
    }

    pub fn terminal_errors(&self) -> u32 {
        self.terminal_errors.load(Ordering::SeqCst)
    }

    pub fn forwarded(&self) -> Vec<Batch> {
        self.forwarded.lock().expect("lock poisoned").clone()
    }

    pub fn forwarded_services(&self) -> Vec<String> {
        self.forwarded()
            .iter()
            .map(|batch| batch.process.service_name.clone())
            .collect()
    }
}

#[async_trait]
impl Forwarder for MockForwarder {
    async fn forward_batch(&self, batch: &Batch) -> Result<(), ForwardError> {
        if let Some(gate) = &self.gate {
            let _ = gate.entered_tx.send(());
            let permit = gate.release.acquire().await.map_err(|_| {
                ForwardError::unavailable("release semaphore closed")
            })?;
            // Each permit unblocks exactly one attempt.
            permit.forget();
        }
        if self.fail_retryable.load(Ordering::SeqCst) {
            self.retry_errors.fetch_add(1, Ordering::SeqCst);
            return Err(ForwardError::unavailable(
                "all collector endpoints are in transient failure",
            ));
        }
        if self.fail_terminal.load(Ordering::SeqCst) {
            self.terminal_errors.fetch_add(1, Ordering::SeqCst);
            return Err(ForwardError::permission_denied("API key rejected"));
        }
        self.forwarded
            .lock()
            .expect("lock poisoned")
            .push(batch.clone());
        Ok(())
    }
}
