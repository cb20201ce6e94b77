// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the forwarding pipeline.
//!
//! The ingestion path only ever observes queue-level errors (full, closed);
//! downstream transport failures are absorbed by the retry loop and surface
//! through metrics and logs instead.

use std::fmt;

use thiserror::Error;

/// Transport status category attached to a forwarding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unavailable,
    DeadlineExceeded,
    Unknown,
    PermissionDenied,
    InvalidArgument,
    ResourceExhausted,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
            ErrorKind::Unknown => "unknown",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Failure reported by the downstream transport while forwarding a batch.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ForwardError {
    kind: ErrorKind,
    message: String,
}

impl ForwardError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ForwardError {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Errors surfaced to the caller of `emit_batch`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The bounded buffer had no free slot; the batch was dropped.
    #[error("queue is full, batch dropped")]
    Full,

    #[error("queue is closed")]
    Closed,

    /// Surfaced only by the direct queue, which processes inline.
    #[error("batch dropped after terminal forwarding error: {0}")]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of the embedded store backing the persistent queue.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("storage transaction aborted")]
    TransactionAborted,

    #[error("stored batch could not be decoded: {0}")]
    Codec(#[from] bincode::Error),
}

impl From<sled::transaction::TransactionError<()>> for StorageError {
    fn from(err: sled::transaction::TransactionError<()>) -> Self {
        match err {
            sled::transaction::TransactionError::Storage(e) => StorageError::Engine(e),
            sled::transaction::TransactionError::Abort(()) => StorageError::TransactionAborted,
        }
    }
}

/// Errors raised while building a reporter. A storage failure here is fatal:
/// durability cannot be assumed on a store that failed to open.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("persistent queue requires a storage directory")]
    MissingStorageDirectory,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
