//! One pipeline worker.
//!
//! A worker owns its [`BatchSink`] and flush deadline outright. It waits on
//! two sources at once, the shared queue and the deadline, and moves through
//! three states:
//!
//! ```text
//! Running ──queue closed and empty──▶ Draining ──final flush──▶ Stopped
//! ```
//!
//! Reaching the batch size flushes straight away and pushes the deadline
//! back, so the timer only fires for batches that fill slowly.

use crossbeam_channel::{Receiver, after, select};
use lbship_core::config::PipelineConfig;
use lbship_core::error::RecordError;
use lbship_core::parse_line;
use lbship_enrich::Enricher;
use lbship_observability::{Metric, PipelineMetrics};
use lbship_sink::{BatchSink, ForwardHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
        }
    }
}

pub struct Worker {
    id: usize,
    state: WorkerState,
    settings: WorkerSettings,
    queue: Receiver<String>,
    enricher: Arc<Enricher>,
    sink: BatchSink,
    forwarder: ForwardHandle,
    metrics: Arc<PipelineMetrics>,
    runtime: Handle,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        settings: WorkerSettings,
        queue: Receiver<String>,
        enricher: Arc<Enricher>,
        sink: BatchSink,
        forwarder: ForwardHandle,
        metrics: Arc<PipelineMetrics>,
        runtime: Handle,
    ) -> Self {
        Self {
            id,
            state: WorkerState::Running,
            settings,
            queue,
            enricher,
            sink,
            forwarder,
            metrics,
            runtime,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run until the queue is closed and drained. Must be called from a
    /// plain thread, not from inside the runtime.
    pub fn run(mut self) -> WorkerState {
        self.metrics.worker_started();
        info!(worker = self.id, batch_size = self.settings.batch_size, "Worker running");

        let queue = self.queue.clone();
        let mut deadline = Instant::now() + self.settings.flush_interval;
        while self.state == WorkerState::Running {
            let timer = after(deadline.saturating_duration_since(Instant::now()));
            select! {
                recv(queue) -> msg => match msg {
                    Ok(line) => {
                        if self.handle_line(&line) >= self.settings.batch_size {
                            self.flush();
                            deadline = Instant::now() + self.settings.flush_interval;
                        }
                    }
                    Err(_) => self.state = WorkerState::Draining,
                },
                recv(timer) -> _ => {
                    self.flush();
                    deadline = Instant::now() + self.settings.flush_interval;
                }
            }
        }

        debug!(worker = self.id, pending = self.sink.pending(), "Worker draining");
        self.flush();
        self.state = WorkerState::Stopped;
        self.metrics.worker_stopped();
        info!(worker = self.id, "Worker stopped");
        self.state
    }

    /// Parse, enrich, and batch one line. Returns the pending count.
    fn handle_line(&mut self, line: &str) -> usize {
        let mut record = match parse_line(line) {
            Ok(record) => record,
            Err(e @ RecordError::Malformed { .. }) => {
                self.metrics.inc(Metric::RecordsMalformed);
                warn!(worker = self.id, error = %e, "Dropping malformed record");
                return self.sink.pending();
            }
            Err(e @ RecordError::RejectedStatus { .. }) => {
                self.metrics.inc(Metric::RecordsRejected);
                debug!(worker = self.id, error = %e, "Dropping record");
                return self.sink.pending();
            }
        };
        self.metrics.inc(Metric::RecordsParsed);

        self.enricher.enrich(&mut record);
        self.forwarder.forward(&record);
        self.sink.add(record)
    }

    /// Failures are already logged by the sink; the worker keeps going.
    fn flush(&mut self) {
        let _ = self.runtime.block_on(self.sink.flush());
    }
}
