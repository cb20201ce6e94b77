// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for integration tests

use std::time::Duration;

use datadog_trace_forwarder::{Batch, Process, Span};

/// Polls `check` every 10ms until it holds, panicking after five seconds.
pub async fn wait_until(description: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}

/// Builds a one-span batch for the given service name.
pub fn test_batch(service_name: &str) -> Batch {
    Batch::new(
        Process::new(service_name),
        vec![Span::new(42, 7, "GET /checkout")],
    )
}
