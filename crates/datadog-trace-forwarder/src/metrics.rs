// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Write-only metrics sink consumed by the reporter and its queues.
//!
//! Registry plumbing and shipping live elsewhere; this module only defines
//! the names the pipeline emits and a recording sink for inspection.

use std::collections::HashMap;
use std::sync::Mutex;

/// Counters emitted by the forwarding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    BatchesSubmitted,
    BatchesFailed,
    BatchesRetried,
    BatchesDropped,
    SpansSubmitted,
    SpansFailed,
}

/// Gauges emitted by the forwarding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    QueueDepth,
    RetryIntervalMillis,
    BatchSpanCount,
}

pub trait MetricsSink: Send + Sync {
    fn incr(&self, counter: Counter, value: u64);
    fn record(&self, gauge: Gauge, value: u64);
}

/// Sink that discards every measurement.
#[derive(Debug, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn incr(&self, _counter: Counter, _value: u64) {}
    fn record(&self, _gauge: Gauge, _value: u64) {}
}

/// Sink that accumulates counters and keeps the latest gauge values in
/// memory, for embedders that poll and for the test suite.
#[derive(Debug, Default)]
pub struct RecordingSink {
    counters: Mutex<HashMap<Counter, u64>>,
    gauges: Mutex<HashMap<Gauge, u64>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        *self
            .counters
            .lock()
            .expect("lock poisoned")
            .get(&counter)
            .unwrap_or(&0)
    }

    pub fn gauge(&self, gauge: Gauge) -> Option<u64> {
        self.gauges
            .lock()
            .expect("lock poisoned")
            .get(&gauge)
            .copied()
    }
}

impl MetricsSink for RecordingSink {
    fn incr(&self, counter: Counter, value: u64) {
        *self
            .counters
            .lock()
            .expect("lock poisoned")
            .entry(counter)
            .or_insert(0) += value;
    }

    fn record(&self, gauge: Gauge, value: u64) {
        self.gauges.lock().expect("lock poisoned").insert(gauge, value);
    }
}
