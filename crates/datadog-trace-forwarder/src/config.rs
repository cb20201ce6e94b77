// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reporter configuration, loadable from `DD_`-prefixed environment
//! variables with defaults for anything unset or unparsable.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::KeyValue;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;
pub const DEFAULT_INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(20);

/// Queue strategy backing the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    /// Bounded in-memory buffer drained by background workers.
    #[default]
    Memory,
    /// No buffering; the enqueue call processes inline.
    Direct,
    /// Disk-backed buffer that survives restarts.
    Persistent,
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(QueueKind::Memory),
            "direct" => Ok(QueueKind::Direct),
            "persistent" => Ok(QueueKind::Persistent),
            other => Err(format!("unsupported queue type: {other}")),
        }
    }
}

/// Settings for the disk-backed queue.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub directory: PathBuf,
    /// Flush the store to disk after every write.
    pub sync_writes: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub queue_kind: QueueKind,
    /// Capacity of the bounded in-memory buffer.
    pub queue_capacity: usize,
    /// Number of worker tasks draining the queue.
    pub worker_concurrency: usize,
    pub initial_retry_interval: Duration,
    pub max_retry_interval: Duration,
    /// Whether an `unknown` transport status is treated as retryable.
    pub retry_unknown: bool,
    /// Tags stamped onto every batch process before it is queued.
    pub agent_tags: Vec<KeyValue>,
    /// Required when `queue_kind` is `Persistent`.
    pub storage: Option<StorageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            queue_kind: QueueKind::Memory,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            initial_retry_interval: DEFAULT_INITIAL_RETRY_INTERVAL,
            max_retry_interval: DEFAULT_MAX_RETRY_INTERVAL,
            retry_unknown: true,
            agent_tags: Vec::new(),
            storage: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Config {
        let mut config = Config::default();

        if let Ok(kind) = env::var("DD_APM_FORWARDER_QUEUE_TYPE") {
            if let Ok(kind) = kind.parse() {
                config.queue_kind = kind;
            }
        }
        if let Some(capacity) = env_parse::<usize>("DD_APM_FORWARDER_QUEUE_SIZE") {
            config.queue_capacity = capacity;
        }
        if let Some(concurrency) = env_parse::<usize>("DD_APM_FORWARDER_CONCURRENCY") {
            config.worker_concurrency = concurrency;
        }
        if let Some(millis) = env_parse::<u64>("DD_APM_FORWARDER_MAX_RETRY_INTERVAL_MS") {
            config.max_retry_interval = Duration::from_millis(millis);
        }
        if let Ok(value) = env::var("DD_APM_FORWARDER_RETRY_UNKNOWN") {
            config.retry_unknown = !matches!(value.as_str(), "false" | "0");
        }
        if let Ok(tags) = env::var("DD_TAGS") {
            config.agent_tags = parse_tags(&tags);
        }
        if let Ok(directory) = env::var("DD_APM_FORWARDER_STORAGE_DIR") {
            let sync_writes = env::var("DD_APM_FORWARDER_SYNC_WRITES")
                .map(|value| matches!(value.as_str(), "true" | "1"))
                .unwrap_or(false);
            config.storage = Some(StorageConfig {
                directory: PathBuf::from(directory),
                sync_writes,
            });
        }

        config
    }

    /// Applies the sanity floors the reporter relies on.
    pub(crate) fn normalized(mut self) -> Config {
        if self.worker_concurrency < 1 {
            self.worker_concurrency = 1;
        }
        if self.queue_capacity < 1 {
            self.queue_capacity = 1;
        }
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Parses `key:value` tags. Space-separated pairs are the standard form; for
/// compatibility reasons comma-separated pairs are accepted as well. The
/// first occurrence of a key wins.
pub(crate) fn parse_tags(raw: &str) -> Vec<KeyValue> {
    let normalized = raw.replace(',', " ");
    let mut tags: Vec<KeyValue> = Vec::new();

    for kv in normalized.split_whitespace() {
        let parts = kv.split(':').collect::<Vec<&str>>();
        if parts.len() == 2 && !tags.iter().any(|tag| tag.key == parts[0]) {
            tags.push(KeyValue::new(parts[0], parts[1]));
        }
    }
    tags
}
