//! Per-worker batch of pending documents.
//!
//! A `BatchSink` is owned by exactly one worker and is never shared, so it
//! needs no locking. Flushing hands the whole batch to [`Storage::bulk`] and
//! starts over with an empty one, whether or not the write succeeded.

use crate::storage::{SinkError, Storage};
use chrono::{DateTime, Utc};
use lbship_core::AccessRecord;
use lbship_core::config::ElasticsearchConfig;
use lbship_observability::{Metric, PipelineMetrics};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Target index, optionally partitioned by UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexName {
    base: String,
    date_suffix: bool,
}

impl IndexName {
    pub fn new(base: impl Into<String>, date_suffix: bool) -> Self {
        Self {
            base: base.into(),
            date_suffix,
        }
    }

    pub fn from_config(config: &ElasticsearchConfig) -> Self {
        Self::new(config.index.clone(), config.index_date_suffix)
    }

    /// `lbship-2024-05-01` with a date suffix, `lbship` without.
    pub fn resolve(&self, now: DateTime<Utc>) -> String {
        if self.date_suffix {
            format!("{}-{}", self.base, now.format("%Y-%m-%d"))
        } else {
            self.base.clone()
        }
    }
}

pub struct BatchSink {
    storage: Arc<dyn Storage>,
    index: IndexName,
    pending: Vec<AccessRecord>,
    metrics: Arc<PipelineMetrics>,
}

impl BatchSink {
    pub fn new(storage: Arc<dyn Storage>, index: IndexName, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            storage,
            index,
            pending: Vec::new(),
            metrics,
        }
    }

    /// Append a document; returns the new pending count.
    pub fn add(&mut self, record: AccessRecord) -> usize {
        self.pending.push(record);
        self.pending.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write everything pending and clear the batch. An empty batch is a
    /// no-op. On error the documents are gone; nothing is kept for replay.
    pub async fn flush(&mut self) -> Result<usize, SinkError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let docs = std::mem::take(&mut self.pending);
        let index = self.index.resolve(Utc::now());

        match self.storage.bulk(&index, &docs).await {
            Ok(outcome) => {
                self.metrics.inc_by(Metric::DocumentsFlushed, outcome.indexed as u64);
                if outcome.failed > 0 {
                    warn!(
                        storage = self.storage.name(),
                        index = %index,
                        failed = outcome.failed,
                        "Documents rejected by storage"
                    );
                }
                debug!(storage = self.storage.name(), index = %index, count = docs.len(), "Batch flushed");
                Ok(docs.len())
            }
            Err(e) => {
                self.metrics.inc(Metric::FlushFailures);
                error!(
                    storage = self.storage.name(),
                    index = %index,
                    lost = docs.len(),
                    error = %e,
                    "Batch flush failed"
                );
                Err(e)
            }
        }
    }
}
