// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of forwarding errors into retryable and terminal.

use crate::error::{ErrorKind, ForwardError};

/// Decides whether a forwarding failure is worth retrying.
///
/// Retryable statuses indicate a transiently unreachable, busy, or timed-out
/// peer. Everything else (permission denied, invalid argument, ...) is
/// terminal: the batch is counted and dropped without further attempts.
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    retry_unknown: bool,
}

impl RetryClassifier {
    pub fn new(retry_unknown: bool) -> Self {
        RetryClassifier { retry_unknown }
    }

    pub fn is_retryable(&self, err: &ForwardError) -> bool {
        match err.kind() {
            ErrorKind::Unavailable | ErrorKind::DeadlineExceeded => true,
            // Some transports surface an unreachable peer as a bare unknown
            // status, so this defaults to retryable but stays overridable.
            ErrorKind::Unknown => self.retry_unknown,
            _ => false,
        }
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        RetryClassifier::new(true)
    }
}
