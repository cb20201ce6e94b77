// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared adaptive backoff for concurrent retry loops.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics::{Gauge, MetricsSink};

struct RetryState {
    current: Duration,
    last_change: Instant,
}

/// One backoff cadence shared by every worker of a reporter.
///
/// This is deliberately collaborative rather than per-batch: all concurrent
/// retriers read and advance the same interval, converging on a single retry
/// rate against the downstream collector.
pub(crate) struct SharedBackoff {
    initial: Duration,
    max: Duration,
    state: Mutex<RetryState>,
    metrics: Arc<dyn MetricsSink>,
}

impl SharedBackoff {
    pub(crate) fn new(initial: Duration, max: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        SharedBackoff {
            initial,
            max,
            state: Mutex::new(RetryState {
                current: initial,
                last_change: Instant::now(),
            }),
            metrics,
        }
    }

    /// Returns the interval to sleep before the next retry, doubling the
    /// shared interval when it is due.
    pub(crate) fn next_interval(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.state.lock().expect("lock poisoned");
        // The interval must have been stable for its own length before it
        // may grow again, otherwise simultaneous workers would each double
        // it and multiply the retry pressure on the collector.
        if state.last_change + state.current < now && state.current < self.max {
            state.current = (state.current * 2).min(self.max);
            state.last_change = Instant::now();
            self.metrics
                .record(Gauge::RetryIntervalMillis, state.current.as_millis() as u64);
        }
        state.current
    }

    /// Resets to the initial interval after a successful forward, so a brief
    /// outage does not keep later traffic throttled by a stale interval.
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.current = self.initial;
        state.last_change = Instant::now();
        self.metrics
            .record(Gauge::RetryIntervalMillis, state.current.as_millis() as u64);
    }

    #[cfg(test)]
    pub(crate) fn current_interval(&self) -> Duration {
        self.state.lock().expect("lock poisoned").current
    }

    #[cfg(test)]
    pub(crate) fn rewind_last_change(&self, by: Duration) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.last_change -= by;
    }
}
