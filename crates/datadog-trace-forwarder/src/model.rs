// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span data model shared by the ingestion and forwarding paths.

use serde::{Deserialize, Serialize};

/// Key/value tag attached to spans and processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Metadata about the process that emitted a batch of spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub service_name: String,
    pub tags: Vec<KeyValue>,
}

impl Process {
    pub fn new(service_name: impl Into<String>) -> Self {
        Process {
            service_name: service_name.into(),
            tags: Vec::new(),
        }
    }

    /// Merges agent-level tags into the process tags. Keys already set by
    /// the application win.
    pub fn merge_tags(&mut self, extra: &[KeyValue]) {
        for kv in extra {
            if !self.tags.iter().any(|existing| existing.key == kv.key) {
                self.tags.push(kv.clone());
            }
        }
    }
}

/// A single trace span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: u128,
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub operation_name: String,
    pub start_time_unix_nanos: u64,
    pub duration_nanos: u64,
    pub tags: Vec<KeyValue>,
}

impl Span {
    pub fn new(trace_id: u128, span_id: u64, operation_name: impl Into<String>) -> Self {
        Span {
            trace_id,
            span_id,
            parent_span_id: None,
            operation_name: operation_name.into(),
            start_time_unix_nanos: 0,
            duration_nanos: 0,
            tags: Vec::new(),
        }
    }
}

/// A set of spans plus the process metadata they share.
///
/// Ownership transfers to the queue on emit; a batch is never mutated after
/// that point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub process: Process,
    pub spans: Vec<Span>,
}

impl Batch {
    pub fn new(process: Process, spans: Vec<Span>) -> Self {
        Batch { process, spans }
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}
